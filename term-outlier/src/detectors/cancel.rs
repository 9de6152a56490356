//! Cooperative cancellation for long-running detectors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{OutlierError, Result};

/// Cooperative cancellation token.
///
/// Detectors poll the token between units of work (a tree, a row of the
/// distance matrix) and stop with [`OutlierError::Cancelled`] once it fires.
/// A child token observes its own flag and every ancestor's, so the ensemble
/// runner can cancel a single timed-out strategy without touching the
/// caller's token.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    // Ancestors first, own flag last.
    flags: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// Creates a new token that is not cancelled.
    pub fn new() -> Self {
        Self {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    /// Creates a token that is cancelled when either it or `self` is cancelled.
    pub fn child_token(&self) -> Self {
        let mut flags = self.flags.clone();
        flags.push(Arc::new(AtomicBool::new(false)));
        Self { flags }
    }

    /// Requests cancellation of this token and all of its children.
    pub fn cancel(&self) {
        if let Some(own) = self.flags.last() {
            own.store(true, Ordering::Relaxed);
        }
    }

    /// Checks whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|flag| flag.load(Ordering::Relaxed))
    }

    /// Returns `Err(Cancelled)` for `strategy` once cancellation was requested.
    pub fn check(&self, strategy: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(OutlierError::cancelled(strategy))
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
