//! Local outlier factor detection.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::stats::{percentile_sorted, sorted};
use super::{
    column_names, CancellationToken, DetectorVerdict, DetectorWarning, FeatureMatrix, NullPolicy,
    OutlierDetector, StrategyKind,
};
use crate::column::NumericColumn;
use crate::error::{DegenerateReason, Result};
use crate::security::InputValidator;

/// Added to reachability means so exact duplicates keep a finite density.
const DENSITY_EPSILON: f64 = 1e-10;

/// Flags rows whose local density is low compared to their neighbours'.
///
/// Distances are Euclidean over the selected columns without scaling.
/// The score of a row is its local outlier factor (about 1 inside a
/// cluster, larger for isolated points). The rows in the top `contamination`
/// share of scores are flagged: the cut-off is the linearly interpolated
/// `1 - contamination` percentile and only scores strictly above it count.
///
/// Neighbours are found by brute force with ties broken by row position,
/// so the result is deterministic and needs no seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LofDetector {
    /// Number of neighbours defining the local neighbourhood.
    pub n_neighbors: usize,

    /// Expected share of anomalies, in `(0, 0.5]`.
    pub contamination: f64,

    /// How rows with null features are handled.
    pub null_policy: NullPolicy,
}

impl Default for LofDetector {
    fn default() -> Self {
        Self {
            n_neighbors: 20,
            contamination: 0.01,
            null_policy: NullPolicy::FillZero,
        }
    }
}

impl LofDetector {
    /// Creates a detector with the given neighbourhood size and contamination.
    pub fn new(n_neighbors: usize, contamination: f64) -> Result<Self> {
        let detector = Self {
            n_neighbors,
            contamination,
            ..Self::default()
        };
        detector.validate()?;
        Ok(detector)
    }

    /// Sets the null handling policy.
    pub fn with_null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    /// Computes the local outlier factor of every point.
    pub fn local_outlier_factors(
        &self,
        points: &[Vec<f64>],
        cancel: &CancellationToken,
    ) -> Result<Vec<f64>> {
        let n = points.len();
        let k = self.n_neighbors.min(n.saturating_sub(1));
        if k == 0 {
            return Ok(vec![1.0; n]);
        }

        let mut neighbors: Vec<Vec<(f64, usize)>> = Vec::with_capacity(n);
        for (i, point) in points.iter().enumerate() {
            cancel.check(self.name())?;
            let mut distances: Vec<(f64, usize)> = points
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(j, other)| (euclidean(point, other), j))
                .collect();
            distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            distances.truncate(k);
            neighbors.push(distances);
        }

        let k_distance: Vec<f64> = neighbors
            .iter()
            .map(|list| list.last().map_or(0.0, |&(d, _)| d))
            .collect();

        let density: Vec<f64> = neighbors
            .iter()
            .map(|list| {
                let reach: f64 = list
                    .iter()
                    .map(|&(d, j)| d.max(k_distance[j]))
                    .sum::<f64>()
                    / list.len() as f64;
                1.0 / (reach + DENSITY_EPSILON)
            })
            .collect();

        Ok(neighbors
            .iter()
            .enumerate()
            .map(|(i, list)| {
                let neighbor_density: f64 =
                    list.iter().map(|&(_, j)| density[j]).sum::<f64>() / list.len() as f64;
                neighbor_density / density[i]
            })
            .collect())
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

impl OutlierDetector for LofDetector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LocalOutlierFactor
    }

    fn description(&self) -> &str {
        "Flags rows in regions of unusually low local density"
    }

    fn validate(&self) -> Result<()> {
        InputValidator::validate_min_count(self.n_neighbors, 1, "n_neighbors")?;
        InputValidator::validate_contamination(self.contamination)
    }

    #[instrument(
        skip(self, columns, cancel),
        fields(columns = columns.len(), n_neighbors = self.n_neighbors)
    )]
    fn detect(
        &self,
        columns: &[NumericColumn],
        cancel: &CancellationToken,
    ) -> Result<DetectorVerdict> {
        let matrix = FeatureMatrix::build(self.kind(), columns, self.null_policy)?;
        let names = column_names(columns);
        let row_ids = columns[0].row_ids();

        if matrix.points.len() < 2 {
            return Ok(DetectorVerdict::degenerate(
                self.kind(),
                names.clone(),
                row_ids,
                DetectorWarning {
                    column: names.join(","),
                    reason: DegenerateReason::TooFewRows,
                },
            ));
        }

        let factors = self.local_outlier_factors(&matrix.points, cancel)?;
        let cutoff = percentile_sorted(&sorted(&factors), 1.0 - self.contamination)
            .unwrap_or(f64::INFINITY);

        debug!(
            rows = matrix.points.len(),
            cutoff,
            "Computed local outlier factors"
        );

        Ok(DetectorVerdict::from_scores(
            self.kind(),
            names,
            row_ids,
            matrix.scatter(row_ids.len(), factors),
            cutoff,
        ))
    }
}
