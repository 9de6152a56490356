//! Modified z-score detection based on the median absolute deviation.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::stats::{is_negligible, median, median_absolute_deviation};
use super::{
    recover_degenerate, single_column, CancellationToken, DetectorVerdict, OutlierDetector,
    StrategyKind,
};
use crate::column::NumericColumn;
use crate::error::{DegenerateReason, OutlierError, Result};
use crate::security::InputValidator;

/// Consistency constant relating the MAD to the standard deviation of a normal distribution.
pub const MAD_CONSTANT: f64 = 0.6745;

/// Flags values whose modified z-score `0.6745 * (x - median) / MAD` exceeds the threshold.
///
/// Median and MAD are robust to the outliers being detected, which makes
/// this detector preferable to [`super::ZScoreDetector`] on small or heavily
/// contaminated samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifiedZScoreDetector {
    /// Modified z-score beyond which a value is anomalous.
    pub threshold: f64,
}

impl Default for ModifiedZScoreDetector {
    fn default() -> Self {
        Self { threshold: 3.5 }
    }
}

impl ModifiedZScoreDetector {
    /// Creates a detector with the given threshold.
    pub fn new(threshold: f64) -> Result<Self> {
        let detector = Self { threshold };
        detector.validate()?;
        Ok(detector)
    }

    fn score(&self, column: &NumericColumn) -> Result<DetectorVerdict> {
        let values = column.non_null_values();
        let median = median(&values)
            .ok_or_else(|| OutlierError::degenerate(column.name(), DegenerateReason::AllNull))?;
        let mad = median_absolute_deviation(&values, median)
            .ok_or_else(|| OutlierError::degenerate(column.name(), DegenerateReason::AllNull))?;
        if is_negligible(mad, median) {
            return Err(OutlierError::degenerate(column.name(), DegenerateReason::ZeroMad));
        }

        debug!(column = %column.name(), median, mad, "Fitted robust statistics");

        let scores = column
            .values()
            .iter()
            .map(|v| v.map(|x| (MAD_CONSTANT * (x - median) / mad).abs()))
            .collect();
        let spread = self.threshold * mad / MAD_CONSTANT;
        Ok(DetectorVerdict::from_scores(
            self.kind(),
            vec![column.name().to_string()],
            column.row_ids(),
            scores,
            self.threshold,
        )
        .with_expected_range(median - spread, median + spread))
    }
}

impl OutlierDetector for ModifiedZScoreDetector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ModifiedZScore
    }

    fn description(&self) -> &str {
        "Flags values far from the median in units of median absolute deviation"
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
