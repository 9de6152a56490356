//! Reconciling the votes of several detectors.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, instrument};

use super::result::{EnsembleResult, EnsembleRow, SkippedStrategy, Vote, VoterInfo, VoterWarning};
use crate::column::RowId;
use crate::detectors::{DetectorVerdict, StrategyKind};
use crate::error::{OutlierError, Result};
use crate::security::InputValidator;

/// Returns the label of a voter.
///
/// Univariate strategies vote once per column and are labelled
/// `"{column}_{method}"`; multivariate strategies vote once and are labelled
/// with the method name.
pub fn voter_label(strategy: StrategyKind, column: Option<&str>) -> String {
    match column {
        Some(column) if !strategy.is_multivariate() => format!("{column}_{strategy}"),
        _ => strategy.to_string(),
    }
}

/// Combines per-voter verdicts into one decision per row.
///
/// A row is anomalous when the weighted number of voters flagging it
/// reaches `min_agreement`. Every voter weighs 1.0 unless configured
/// otherwise, which makes the agreement a plain count.
///
/// # Example
///
/// ```rust
/// use term_outlier::column::NumericColumn;
/// use term_outlier::detectors::{CancellationToken, IqrDetector, OutlierDetector, ZScoreDetector};
/// use term_outlier::ensemble::EnsembleCombiner;
///
/// let column = NumericColumn::from_values("x", vec![1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 100.0]);
/// let cancel = CancellationToken::new();
/// let zscore = ZScoreDetector::new(2.0).unwrap().detect(&[column.clone()], &cancel).unwrap();
/// let iqr = IqrDetector::default().detect(&[column], &cancel).unwrap();
///
/// let result = EnsembleCombiner::new(2).unwrap().combine_verdicts(vec![zscore, iqr]).unwrap();
/// assert_eq!(result.anomaly_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleCombiner {
    min_agreement: usize,
    weights: BTreeMap<StrategyKind, f64>,
}

impl EnsembleCombiner {
    /// Creates a combiner requiring `min_agreement` votes.
    pub fn new(min_agreement: usize) -> Result<Self> {
        InputValidator::validate_min_count(min_agreement, 1, "min_agreement")?;
        Ok(Self {
            min_agreement,
            weights: BTreeMap::new(),
        })
    }

    /// Sets the vote weight of every voter of the given strategy.
    pub fn with_weight(mut self, strategy: StrategyKind, weight: f64) -> Result<Self> {
        InputValidator::validate_non_negative(weight, "weight")?;
        self.weights.insert(strategy, weight);
        Ok(self)
    }

    /// Returns the agreement required to flag a row.
    pub fn min_agreement(&self) -> usize {
        self.min_agreement
    }

    /// Returns the vote weight of a strategy.
    pub fn weight(&self, strategy: StrategyKind) -> f64 {
        self.weights.get(&strategy).copied().unwrap_or(1.0)
    }

    /// Checks that `min_agreement` is reachable with the given voters.
    pub fn check_satisfiable<I>(&self, strategies: I) -> Result<()>
    where
        I: IntoIterator<Item = StrategyKind>,
    {
        let mut count = 0usize;
        let total: f64 = strategies
            .into_iter()
            .inspect(|_| count += 1)
            .map(|kind| self.weight(kind))
            .sum();
        if total < self.min_agreement as f64 {
            return Err(OutlierError::configuration(format!(
                "min_agreement {} cannot be reached by {count} active voters with total weight {total}",
                self.min_agreement
            )));
        }
        Ok(())
    }

    /// Combines verdicts labelled with [`voter_label`].
    pub fn combine_verdicts(&self, verdicts: Vec<DetectorVerdict>) -> Result<EnsembleResult> {
        let voters = verdicts
            .into_iter()
            .map(|v| {
                let column = match v.columns() {
                    [column] => Some(column.as_str()),
                    _ => None,
                };
                (voter_label(v.strategy(), column), v)
            })
            .collect();
        self.combine(voters, Vec::new())
    }

    /// Combines labelled verdicts.
    ///
    /// `skipped` lists voters that failed; they do not count towards the
    /// agreement but are reported in the result.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when labels repeat, when the verdicts
    /// do not cover the same row ids, or when `min_agreement` exceeds the
    /// total weight of the active voters.
    #[instrument(skip(self, voters, skipped), fields(voters = voters.len(), skipped = skipped.len()))]
    pub fn combine(
        &self,
        voters: Vec<(String, DetectorVerdict)>,
        skipped: Vec<SkippedStrategy>,
    ) -> Result<EnsembleResult> {
        let mut labels = HashSet::new();
        for (label, _) in &voters {
            if !labels.insert(label.as_str()) {
                return Err(OutlierError::configuration(format!(
                    "Voter '{label}' appears more than once"
                )));
            }
        }
        self.check_satisfiable(voters.iter().map(|(_, v)| v.strategy()))?;

        let Some((first_label, first)) = voters.first() else {
            return Err(OutlierError::configuration("No voters to combine"));
        };
        let universe: Vec<RowId> = first.rows().iter().map(|r| r.row_id).collect();
        let position: HashMap<RowId, usize> = universe
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        if position.len() != universe.len() {
            return Err(OutlierError::configuration(format!(
                "Voter '{first_label}' repeats row ids"
            )));
        }

        let mut votes = vec![Vec::with_capacity(voters.len()); universe.len()];
        for (label, verdict) in &voters {
            let aligned = align(label, verdict, &position)?;
            for (row_votes, vote) in votes.iter_mut().zip(aligned) {
                row_votes.push(vote);
            }
        }

        let weights: Vec<f64> = voters
            .iter()
            .map(|(_, v)| self.weight(v.strategy()))
            .collect();
        let threshold = self.min_agreement as f64;
        let rows: Vec<EnsembleRow> = universe
            .into_iter()
            .zip(votes)
            .map(|(row_id, votes)| {
                let flag_count = votes.iter().filter(|v| v.is_anomaly).count();
                let agreement: f64 = votes
                    .iter()
                    .zip(&weights)
                    .filter(|(v, _)| v.is_anomaly)
                    .map(|(_, w)| w)
                    .sum();
                EnsembleRow {
                    row_id,
                    votes,
                    flag_count,
                    agreement,
                    is_anomaly: agreement >= threshold,
                }
            })
            .collect();

        let warnings = voters
            .iter()
            .flat_map(|(label, verdict)| {
                verdict.warnings().iter().map(move |w| VoterWarning {
                    voter: label.clone(),
                    warning: w.clone(),
                })
            })
            .collect();
        let infos = voters
            .iter()
            .zip(&weights)
            .map(|((label, verdict), &weight)| VoterInfo {
                label: label.clone(),
                strategy: verdict.strategy(),
                columns: verdict.columns().to_vec(),
                weight,
                has_scores: verdict.has_scores(),
            })
            .collect();

        let result = EnsembleResult::new(rows, infos, skipped, warnings, self.min_agreement);
        debug!(
            rows = result.rows().len(),
            anomalies = result.anomaly_count(),
            "Combined verdicts"
        );
        Ok(result)
    }
}

/// Reorders a verdict's votes into universe order, rejecting any mismatch.
fn align(label: &str, verdict: &DetectorVerdict, position: &HashMap<RowId, usize>) -> Result<Vec<Vote>> {
    if verdict.len() != position.len() {
        return Err(OutlierError::configuration(format!(
            "Voter '{label}' covers {} rows, expected {}",
            verdict.len(),
            position.len()
        )));
    }
    let mut aligned: Vec<Option<Vote>> = vec![None; position.len()];
    for row in verdict.rows() {
        let index = position.get(&row.row_id).ok_or_else(|| {
            OutlierError::configuration(format!(
                "Voter '{label}' contains row id {} outside the row universe",
                row.row_id
            ))
        })?;
        if aligned[*index].is_some() {
            return Err(OutlierError::configuration(format!(
                "Voter '{label}' repeats row id {}",
                row.row_id
            )));
        }
        aligned[*index] = Some(Vote {
            is_anomaly: row.is_anomaly,
            score: row.score,
        });
    }
    aligned
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| OutlierError::Internal(format!("Voter '{label}' left rows unassigned")))
}
