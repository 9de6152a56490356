//! Per-row verdicts produced by a single detector run.

use serde::{Deserialize, Serialize};

use super::StrategyKind;
use crate::column::RowId;
use crate::error::DegenerateReason;

/// The decision for one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowVerdict {
    /// Identity of the row.
    pub row_id: RowId,

    /// Whether the row was flagged as anomalous.
    pub is_anomaly: bool,

    /// Anomaly score, higher is more anomalous. `None` when the strategy
    /// produced no score for this row (null value, unavailable window, or a
    /// strategy that only emits flags).
    pub score: Option<f64>,
}

/// Marker attached to a verdict whose input could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorWarning {
    /// Column the warning refers to.
    pub column: String,

    /// Why the column was not scored.
    pub reason: DegenerateReason,
}

impl std::fmt::Display for DetectorWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "column '{}': {}", self.column, self.reason)
    }
}

/// Output of one detector over one column (or one feature set).
///
/// Verdicts are immutable once built; accessors only hand out shared views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorVerdict {
    strategy: StrategyKind,
    columns: Vec<String>,
    threshold: Option<f64>,
    expected_range: Option<(f64, f64)>,
    rows: Vec<RowVerdict>,
    warnings: Vec<DetectorWarning>,
}

impl DetectorVerdict {
    /// Builds a verdict by comparing each score against `threshold`.
    ///
    /// A row is anomalous when its score is strictly greater than the
    /// threshold; rows without a score are never anomalous.
    pub fn from_scores(
        strategy: StrategyKind,
        columns: Vec<String>,
        row_ids: &[RowId],
        scores: Vec<Option<f64>>,
        threshold: f64,
    ) -> Self {
        let rows = row_ids
            .iter()
            .zip(scores)
            .map(|(&row_id, score)| RowVerdict {
                row_id,
                is_anomaly: score.is_some_and(|s| s > threshold),
                score,
            })
            .collect();
        Self {
            strategy,
            columns,
            threshold: Some(threshold),
            expected_range: None,
            rows,
            warnings: Vec::new(),
        }
    }

    /// Builds a verdict from precomputed flags without scores.
    pub fn from_flags(
        strategy: StrategyKind,
        columns: Vec<String>,
        row_ids: &[RowId],
        flags: Vec<bool>,
    ) -> Self {
        let rows = row_ids
            .iter()
            .zip(flags)
            .map(|(&row_id, is_anomaly)| RowVerdict {
                row_id,
                is_anomaly,
                score: None,
            })
            .collect();
        Self {
            strategy,
            columns,
            threshold: None,
            expected_range: None,
            rows,
            warnings: Vec::new(),
        }
    }

    /// Builds the all-`false` verdict emitted for degenerate input.
    pub fn degenerate(
        strategy: StrategyKind,
        columns: Vec<String>,
        row_ids: &[RowId],
        warning: DetectorWarning,
    ) -> Self {
        let mut verdict = Self::from_flags(strategy, columns, row_ids, vec![false; row_ids.len()]);
        verdict.warnings.push(warning);
        verdict
    }

    /// Records the value range considered normal.
    pub fn with_expected_range(mut self, lower: f64, upper: f64) -> Self {
        self.expected_range = Some((lower, upper));
        self
    }

    /// Returns the strategy that produced this verdict.
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Returns the columns that were scored.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the score threshold, if the strategy is score-based.
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Returns the value range considered normal, if the strategy has a global one.
    pub fn expected_range(&self) -> Option<(f64, f64)> {
        self.expected_range
    }

    /// Returns the per-row verdicts in input order.
    pub fn rows(&self) -> &[RowVerdict] {
        &self.rows
    }

    /// Returns the degenerate-input warnings.
    pub fn warnings(&self) -> &[DetectorWarning] {
        &self.warnings
    }

    /// Returns true when the input could not be scored.
    pub fn is_degenerate(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the verdict covers no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the ids of flagged rows in input order.
    pub fn anomalies(&self) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|r| r.is_anomaly)
            .map(|r| r.row_id)
            .collect()
    }

    /// Returns the number of flagged rows.
    pub fn anomaly_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_anomaly).count()
    }

    /// Returns true when any row carries a score.
    pub fn has_scores(&self) -> bool {
        self.rows.iter().any(|r| r.score.is_some())
    }
}
