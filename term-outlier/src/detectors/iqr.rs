//! Interquartile range (Tukey fence) detection.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::stats::{percentile_sorted, sorted};
use super::{
    recover_degenerate, single_column, CancellationToken, DetectorVerdict, OutlierDetector,
    StrategyKind,
};
use crate::column::NumericColumn;
use crate::error::{DegenerateReason, OutlierError, Result};
use crate::security::InputValidator;

/// Flags values outside `[Q1 - m*IQR, Q3 + m*IQR]`.
///
/// Quartiles use linear interpolation between closest ranks. The detector
/// emits flags only; rows carry no score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IqrDetector {
    /// Fence multiplier `m`.
    pub multiplier: f64,
}

impl Default for IqrDetector {
    fn default() -> Self {
        Self { multiplier: 1.5 }
    }
}

impl IqrDetector {
    /// Creates a detector with the given fence multiplier.
    pub fn new(multiplier: f64) -> Result<Self> {
        let detector = Self { multiplier };
        detector.validate()?;
        Ok(detector)
    }

    /// Computes the fences for a set of non-null values.
    pub fn bounds(&self, values: &[f64]) -> Option<(f64, f64)> {
        let sorted = sorted(values);
        let q1 = percentile_sorted(&sorted, 0.25)?;
        let q3 = percentile_sorted(&sorted, 0.75)?;
        let iqr = q3 - q1;
        Some((q1 - self.multiplier * iqr, q3 + self.multiplier * iqr))
    }

    fn score(&self, column: &NumericColumn) -> Result<DetectorVerdict> {
        let values = column.non_null_values();
        let (lower, upper) = self
            .bounds(&values)
            .ok_or_else(|| OutlierError::degenerate(column.name(), DegenerateReason::AllNull))?;
        if values.iter().all(|&v| v == values[0]) {
            return Err(OutlierError::degenerate(
                column.name(),
                DegenerateReason::ZeroVariance,
            ));
        }

        debug!(column = %column.name(), lower, upper, "Computed IQR fences");

        let flags = column
            .values()
            .iter()
            .map(|v| v.is_some_and(|x| x < lower || x > upper))
            .collect();
        Ok(DetectorVerdict::from_flags(
            self.kind(),
            vec![column.name().to_string()],
            column.row_ids(),
            flags,
        )
        .with_expected_range(lower, upper))
    }
}

impl OutlierDetector for IqrDetector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Iqr
    }

    fn description(&self) -> &str {
        "Flags values outside the interquartile range fences"
    }

    fn validate(&self) -> Result<()> {
        InputValidator::validate_non_negative(self.multiplier, "multiplier")
    }

    #[instrument(skip(self, columns, _cancel), fields(multiplier = self.multiplier))]
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::RowId;

    fn detect(detector: &IqrDetector, column: NumericColumn) -> DetectorVerdict {
        detector.detect(&[column], &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_flags_only_the_extreme_value() {
        let column = NumericColumn::from_values("x", vec![1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 100.0]);
        let verdict = detect(&IqrDetector::default(), column);

        // Q1 = 1.75, Q3 = 2.25, fences at 1.0 and 3.0 (inclusive).
        assert_eq!(verdict.anomalies(), vec![RowId(7)]);
        let (lower, upper) = verdict.expected_range().unwrap();
        assert!((lower - 1.0).abs() < 1e-12);
        assert!((upper - 3.0).abs() < 1e-12);
        assert!(!verdict.has_scores());
    }

    #[test]
    fn test_fences_are_inclusive() {
        let detector = IqrDetector::new(0.0).unwrap();
        let column = NumericColumn::from_values("x", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        // Q1 = 2, Q3 = 4 with a zero multiplier.
        let verdict = detect(&detector, column);
        assert_eq!(verdict.anomalies(), vec![RowId(0), RowId(4)]);
    }

    #[test]
    fn test_nulls_never_flagged() {
        let column =
            NumericColumn::from_options("x", vec![Some(1.0), None, Some(2.0), Some(2.0), Some(50.0)]);
        let verdict = detect(&IqrDetector::default(), column);
        assert!(!verdict.rows()[1].is_anomaly);
        assert_eq!(verdict.anomalies(), vec![RowId(4)]);
    }

    #[test]
    fn test_constant_and_empty_columns() {
        let constant = detect(
            &IqrDetector::default(),
            NumericColumn::from_values("x", vec![2.0; 6]),
        );
        assert_eq!(constant.anomaly_count(), 0);
        assert_eq!(constant.warnings()[0].reason, DegenerateReason::ZeroVariance);

        let empty = detect(
            &IqrDetector::default(),
            NumericColumn::from_options("x", vec![None; 4]),
        );
        assert_eq!(empty.anomaly_count(), 0);
        assert_eq!(empty.warnings()[0].reason, DegenerateReason::AllNull);
    }

    #[test]
    fn test_negative_multiplier_rejected() {
        assert!(IqrDetector::new(-0.5).is_err());
        assert!(IqrDetector::new(f64::INFINITY).is_err());
    }
}
