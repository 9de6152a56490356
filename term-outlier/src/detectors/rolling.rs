//! Centered rolling-window detection.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::stats::{is_negligible, mean, sample_std};
use super::{
    recover_degenerate, single_column, CancellationToken, DetectorVerdict, OutlierDetector,
    StrategyKind,
};
use crate::column::NumericColumn;
use crate::error::{DegenerateReason, OutlierError, Result};
use crate::security::InputValidator;

/// Flags values that leave the mean ± `n_std`·std band of their centered window.
///
/// The window for row `i` covers rows `i - window/2` through
/// `i - window/2 + window - 1` and includes the row itself. The column must
/// be ordered (typically by time).
///
/// Edge policy: a row whose window runs past either end of the column, or
/// contains a null, has no score and is never flagged. A window with zero
/// spread flags nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingDetector {
    /// Number of rows in each window.
    pub window: usize,

    /// Width of the accepted band in window standard deviations.
    pub n_std: f64,
}

impl Default for RollingDetector {
    fn default() -> Self {
        Self {
            window: 7,
            n_std: 2.0,
        }
    }
}

impl RollingDetector {
    /// Creates a detector with the given window size and band width.
    pub fn new(window: usize, n_std: f64) -> Result<Self> {
        let detector = Self { window, n_std };
        detector.validate()?;
        Ok(detector)
    }

    /// Returns the index range of the window centered on `index`, or `None`
    /// when it does not fit inside a column of length `len`.
    fn window_range(&self, index: usize, len: usize) -> Option<std::ops::Range<usize>> {
        let start = index.checked_sub(self.window / 2)?;
        let end = start + self.window;
        (end <= len).then_some(start..end)
    }

    fn score(&self, column: &NumericColumn) -> Result<DetectorVerdict> {
        if column.null_count() == column.len() {
            return Err(OutlierError::degenerate(column.name(), DegenerateReason::AllNull));
        }

        let values = column.values();
        let mut window_values = Vec::with_capacity(self.window);
        let mut scored = 0usize;
        let scores: Vec<Option<f64>> = (0..values.len())
            .map(|i| {
                let x = values[i]?;
                let range = self.window_range(i, values.len())?;
                window_values.clear();
                for v in &values[range] {
                    window_values.push((*v)?);
                }
                let m = mean(&window_values)?;
                let s = sample_std(&window_values, m)?;
                scored += 1;
                if is_negligible(s, m) {
                    Some(0.0)
                } else {
                    Some((x - m).abs() / s)
                }
            })
            .collect();

        debug!(
            column = %column.name(),
            window = self.window,
            scored_rows = scored,
            "Computed rolling scores"
        );

        Ok(DetectorVerdict::from_scores(
            self.kind(),
            vec![column.name().to_string()],
            column.row_ids(),
            scores,
            self.n_std,
        ))
    }
}

impl OutlierDetector for RollingDetector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rolling
    }

    fn description(&self) -> &str {
        "Flags values outside the mean and standard deviation band of a centered window"
    }

    fn validate(&self) -> Result<()> {
        InputValidator::validate_min_count(self.window, 2, "window")?;
        InputValidator::validate_positive(self.n_std, "n_std")
    }

    #[instrument(skip(self, columns, _cancel), fields(window = self.window, n_std = self.n_std))]
    fn detect(
        &self,
        columns: &[NumericColumn],
        _cancel: &CancellationToken,
    ) -> Result<DetectorVerdict> {
        let column = single_column(self.kind(), columns)?;
        recover_degenerate(
            self.kind(),
            vec![column.name().to_string()],
            column.row_ids(),
            self.score(column),
        )
    }
}
