//! Z-score detection.

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

/// Flags values more than `threshold` sample standard deviations from the mean.
///
/// The score of a row is `|x - mean| / std`. Nulls are excluded from the
/// statistics and never flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZScoreDetector {
    /// Number of standard deviations beyond which a value is anomalous.
    pub threshold: f64,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self { threshold: 3.0 }
    }
}

impl ZScoreDetector {
    /// Creates a detector with the given threshold.
    ///
    /// # Errors
    /// Returns an error if the threshold is not finite or not positive.
    pub fn new(threshold: f64) -> Result<Self> {
        let detector = Self { threshold };
        detector.validate()?;
        Ok(detector)
    }

    fn score(&self, column: &NumericColumn) -> Result<DetectorVerdict> {
        let values = column.non_null_values();
        let mean = mean(&values)
            .ok_or_else(|| OutlierError::degenerate(column.name(), DegenerateReason::AllNull))?;
        let std = sample_std(&values, mean)
            .ok_or_else(|| OutlierError::degenerate(column.name(), DegenerateReason::TooFewRows))?;
        if is_negligible(std, mean) {
            return Err(OutlierError::degenerate(
                column.name(),
                DegenerateReason::ZeroVariance,
            ));
        }

        debug!(column = %column.name(), mean, std, "Fitted z-score statistics");

        let scores = column
            .values()
            .iter()
            .map(|v| v.map(|x| (x - mean).abs() / std))
            .collect();
        Ok(DetectorVerdict::from_scores(
            self.kind(),
            vec![column.name().to_string()],
            column.row_ids(),
            scores,
            self.threshold,
        )
        .with_expected_range(mean - self.threshold * std, mean + self.threshold * std))
    }
}

impl OutlierDetector for ZScoreDetector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ZScore
    }

    fn description(&self) -> &str {
        "Flags values far from the mean in units of standard deviation"
    }

    fn validate(&self) -> Result<()> {
        InputValidator::validate_positive(self.threshold, "threshold")
    }

    #[instrument(skip(self, columns, _cancel), fields(threshold = self.threshold))]
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
