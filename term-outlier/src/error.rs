//! Error types for the term-outlier library.
//!
//! All fallible operations return [`OutlierError`]. The variants fall into
//! three classes that the ensemble runner treats differently:
//!
//! - **Configuration errors** (`Configuration`, `ColumnNotFound`,
//!   `TypeMismatch`, `DuplicateRowId`) are fatal and surfaced immediately.
//! - **Degenerate input** (`DegenerateInput`) never escapes a detector. It is
//!   turned into an all-`false` verdict carrying a warning marker.
//! - **Strategy failures** (`Cancelled`, `Timeout`, `StrategyFailed`) are
//!   isolated per strategy and reported as skipped, unless the caller asked
//!   for all-or-nothing semantics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a column could not be scored meaningfully by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateReason {
    /// The column has no non-null values.
    AllNull,
    /// Standard deviation of the scored values is zero.
    ZeroVariance,
    /// Median absolute deviation of the scored values is zero.
    ZeroMad,
    /// Too few usable rows to fit the model.
    TooFewRows,
}

impl std::fmt::Display for DegenerateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DegenerateReason::AllNull => "all values are null",
            DegenerateReason::ZeroVariance => "standard deviation is zero",
            DegenerateReason::ZeroMad => "median absolute deviation is zero",
            DegenerateReason::TooFewRows => "too few usable rows",
        };
        f.write_str(text)
    }
}

/// The main error type for the term-outlier library.
#[derive(Error, Debug)]
pub enum OutlierError {
    /// Invalid parameters or an input shape the requested operation cannot handle.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A requested column does not exist in the dataset.
    #[error("Column '{column}' not found in dataset")]
    ColumnNotFound { column: String },

    /// A column has a type that cannot be interpreted as numeric.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The same row identity appears more than once.
    #[error("Duplicate row id {row_id}")]
    DuplicateRowId { row_id: i64 },

    /// The column cannot be scored; handled locally by the detector.
    #[error("Degenerate input in column '{column}': {reason}")]
    DegenerateInput {
        column: String,
        reason: DegenerateReason,
    },

    /// The strategy observed a cancellation request.
    #[error("Strategy '{strategy}' was cancelled")]
    Cancelled { strategy: String },

    /// The strategy did not finish within the configured timeout.
    #[error("Strategy '{strategy}' timed out after {timeout_ms}ms")]
    Timeout { strategy: String, timeout_ms: u64 },

    /// The strategy failed for a reason other than cancellation.
    #[error("Strategy '{strategy}' failed: {message}")]
    StrategyFailed { strategy: String, message: String },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Security-related error.
    #[error("Security error: {0}")]
    SecurityError(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, OutlierError>`.
pub type Result<T> = std::result::Result<T, OutlierError>;

impl OutlierError {
    /// Creates a configuration error with the given message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a degenerate input error.
    pub fn degenerate(column: impl Into<String>, reason: DegenerateReason) -> Self {
        Self::DegenerateInput {
            column: column.into(),
            reason,
        }
    }

    /// Creates a strategy failure error.
    pub fn strategy_failed(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StrategyFailed {
            strategy: strategy.into(),
            message: message.into(),
        }
    }

    /// Creates a cancellation error for the given strategy.
    pub fn cancelled(strategy: impl Into<String>) -> Self {
        Self::Cancelled {
            strategy: strategy.into(),
        }
    }

    /// Returns true for errors that describe an invalid request rather than a
    /// runtime failure. These abort an ensemble run regardless of its error policy.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::ColumnNotFound { .. }
                | Self::TypeMismatch { .. }
                | Self::DuplicateRowId { .. }
                | Self::SecurityError(_)
        )
    }

    /// Returns true for failures confined to a single strategy.
    pub fn is_strategy_failure(&self) -> bool {
        matches!(
            self,
            Self::Cancelled { .. } | Self::Timeout { .. } | Self::StrategyFailed { .. }
        )
    }
}

impl From<serde_json::Error> for OutlierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<OutlierError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| attach(msg, e.into()))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| attach(&f(), e.into()))
    }
}

// Configuration errors keep their class so callers can still tell them apart.
fn attach(msg: &str, err: OutlierError) -> OutlierError {
    match err {
        OutlierError::Configuration(inner) => {
            OutlierError::Configuration(format!("{msg}: {inner}"))
        }
        OutlierError::Internal(inner) => OutlierError::Internal(format!("{msg}: {inner}")),
        other => OutlierError::Internal(format!("{msg}: {other}")),
    }
}
