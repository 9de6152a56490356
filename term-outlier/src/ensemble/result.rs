//! Combined ensemble output.

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::column::RowId;
use crate::detectors::{DetectorWarning, StrategyKind};
use crate::error::Result;

/// One strategy run that contributed votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterInfo {
    /// Label of the voter, `"{column}_{method}"` or `"{method}"`.
    pub label: String,

    /// Strategy that produced the votes.
    pub strategy: StrategyKind,

    /// Columns the strategy scored.
    pub columns: Vec<String>,

    /// Weight of each vote in the agreement score.
    pub weight: f64,

    /// Whether the voter produced scores alongside its flags.
    pub has_scores: bool,
}

/// A strategy run excluded from the agreement count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedStrategy {
    /// Label the voter would have had.
    pub voter: String,

    /// Strategy that failed.
    pub strategy: StrategyKind,

    /// Why it was skipped.
    pub reason: String,
}

/// A degenerate-input warning raised by one voter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterWarning {
    pub voter: String,
    pub warning: DetectorWarning,
}

/// A single voter's decision on one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub is_anomaly: bool,
    pub score: Option<f64>,
}

/// Combined decision for one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleRow {
    /// Identity of the row.
    pub row_id: RowId,

    /// Votes in the order of [`EnsembleResult::voters`].
    pub votes: Vec<Vote>,

    /// Number of voters that flagged the row.
    pub flag_count: usize,

    /// Weighted sum of the flagging voters.
    pub agreement: f64,

    /// Whether the agreement reached the required minimum.
    pub is_anomaly: bool,
}

/// Timing information about an ensemble run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Timestamp when the run started.
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Timestamp when the run completed.
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Additional custom metadata.
    pub custom: HashMap<String, String>,
}

impl RunMetadata {
    /// Records the start time of the run.
    pub fn record_start(&mut self) {
        self.start_time = Some(chrono::Utc::now());
    }

    /// Records the end time of the run.
    pub fn record_end(&mut self) {
        self.end_time = Some(chrono::Utc::now());
    }

    /// Returns the duration of the run if both timestamps are recorded.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Adds custom metadata.
    pub fn add_custom(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom.insert(key.into(), value.into());
    }
}

/// Result of combining the verdicts of several voters.
///
/// Covers exactly the input row-id universe, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    rows: Vec<EnsembleRow>,
    voters: Vec<VoterInfo>,
    skipped: Vec<SkippedStrategy>,
    warnings: Vec<VoterWarning>,
    min_agreement: usize,
    metadata: RunMetadata,
}

impl EnsembleResult {
    pub(crate) fn new(
        rows: Vec<EnsembleRow>,
        voters: Vec<VoterInfo>,
        skipped: Vec<SkippedStrategy>,
        warnings: Vec<VoterWarning>,
        min_agreement: usize,
    ) -> Self {
        Self {
            rows,
            voters,
            skipped,
            warnings,
            min_agreement,
            metadata: RunMetadata::default(),
        }
    }

    pub(crate) fn with_metadata(mut self, metadata: RunMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns all rows in input order.
    pub fn rows(&self) -> &[EnsembleRow] {
        &self.rows
    }

    /// Looks up a row by id.
    pub fn row(&self, row_id: RowId) -> Option<&EnsembleRow> {
        self.rows.iter().find(|r| r.row_id == row_id)
    }

    /// Returns the ids of rows flagged by the ensemble.
    pub fn anomalies(&self) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|r| r.is_anomaly)
            .map(|r| r.row_id)
            .collect()
    }

    /// Returns the number of rows flagged by the ensemble.
    pub fn anomaly_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_anomaly).count()
    }

    /// Returns the voters that contributed, in vote order.
    pub fn voters(&self) -> &[VoterInfo] {
        &self.voters
    }

    /// Returns the position of a voter by label.
    pub fn voter_index(&self, label: &str) -> Option<usize> {
        self.voters.iter().position(|v| v.label == label)
    }

    /// Returns the vote of `label` on `row_id`.
    pub fn vote(&self, row_id: RowId, label: &str) -> Option<Vote> {
        let index = self.voter_index(label)?;
        self.row(row_id).map(|r| r.votes[index])
    }

    /// Returns the strategies that were skipped.
    pub fn skipped(&self) -> &[SkippedStrategy] {
        &self.skipped
    }

    /// Returns degenerate-input warnings raised by the voters.
    pub fn warnings(&self) -> &[VoterWarning] {
        &self.warnings
    }

    /// Returns the agreement required to flag a row.
    pub fn min_agreement(&self) -> usize {
        self.min_agreement
    }

    /// Returns run timing information.
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Returns a short summary of the run.
    pub fn summary(&self) -> EnsembleSummary {
        let total_rows = self.rows.len();
        let anomaly_count = self.anomaly_count();
        let voter_anomalies = self
            .voters
            .iter()
            .enumerate()
            .map(|(i, voter)| {
                let count = self.rows.iter().filter(|r| r.votes[i].is_anomaly).count();
                (voter.label.clone(), count)
            })
            .collect();
        EnsembleSummary {
            total_rows,
            anomaly_count,
            anomaly_rate: if total_rows == 0 {
                0.0
            } else {
                anomaly_count as f64 / total_rows as f64
            },
            min_agreement: self.min_agreement,
            voter_anomalies,
            skipped: self.skipped.iter().map(|s| s.voter.clone()).collect(),
            warning_count: self.warnings.len(),
            duration_ms: self
                .metadata
                .duration()
                .map(|d| d.num_milliseconds().max(0) as u64),
        }
    }

    /// Converts the result into an Arrow table.
    ///
    /// Columns: `row_id`, one Boolean column per voter, a Float64
    /// `<voter>_score` column for every voter that produced scores,
    /// `agreement` and `is_anomaly`.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![Field::new("row_id", DataType::Int64, false)];
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(Int64Array::from_iter_values(
            self.rows.iter().map(|r| r.row_id.0),
        ))];

        for (i, voter) in self.voters.iter().enumerate() {
            fields.push(Field::new(&voter.label, DataType::Boolean, false));
            arrays.push(Arc::new(BooleanArray::from(
                self.rows
                    .iter()
                    .map(|r| r.votes[i].is_anomaly)
                    .collect::<Vec<_>>(),
            )));
            if voter.has_scores {
                fields.push(Field::new(
                    format!("{}_score", voter.label),
                    DataType::Float64,
                    true,
                ));
                arrays.push(Arc::new(Float64Array::from(
                    self.rows.iter().map(|r| r.votes[i].score).collect::<Vec<_>>(),
                )));
            }
        }

        fields.push(Field::new("agreement", DataType::Float64, false));
        arrays.push(Arc::new(Float64Array::from_iter_values(
            self.rows.iter().map(|r| r.agreement),
        )));
        fields.push(Field::new("is_anomaly", DataType::Boolean, false));
        arrays.push(Arc::new(BooleanArray::from(
            self.rows.iter().map(|r| r.is_anomaly).collect::<Vec<_>>(),
        )));

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }
}

/// Summary of an ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    /// Number of rows scored.
    pub total_rows: usize,

    /// Number of rows flagged by the ensemble.
    pub anomaly_count: usize,

    /// Share of rows flagged by the ensemble.
    pub anomaly_rate: f64,

    /// Agreement required to flag a row.
    pub min_agreement: usize,

    /// Rows flagged by each voter.
    pub voter_anomalies: Vec<(String, usize)>,

    /// Labels of skipped voters.
    pub skipped: Vec<String>,

    /// Number of degenerate-input warnings.
    pub warning_count: usize,

    /// Wall-clock duration of the run, when timed.
    pub duration_ms: Option<u64>,
}

impl std::fmt::Display for EnsembleSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} of {} rows flagged ({:.2}%) with min_agreement {}",
            self.anomaly_count,
            self.total_rows,
            self.anomaly_rate * 100.0,
            self.min_agreement
        )?;
        for (voter, count) in &self.voter_anomalies {
            writeln!(f, "  {voter}: {count}")?;
        }
        if !self.skipped.is_empty() {
            writeln!(f, "  skipped: {}", self.skipped.join(", "))?;
        }
        if self.warning_count > 0 {
            writeln!(f, "  warnings: {}", self.warning_count)?;
        }
        Ok(())
    }
}
