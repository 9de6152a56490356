//! Isolation forest detection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
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

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Flags rows that random axis-aligned splits isolate unusually quickly.
///
/// Each tree is grown on a random subsample until points are isolated or
/// the height limit `ceil(log2(subsample))` is reached. The score of a row
/// is `2^(-E[h(x)] / c(subsample))`, between 0 and 1 with higher values
/// more anomalous. The top `contamination` share of scores is flagged with
/// the same percentile rule as [`super::LofDetector`].
///
/// All randomness comes from a generator seeded with `seed`, so a fixed
/// seed and input always give the same verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestDetector {
    /// Number of trees.
    pub n_estimators: usize,

    /// Rows sampled per tree (capped at the number of usable rows).
    pub max_samples: usize,

    /// Expected share of anomalies, in `(0, 0.5]`.
    pub contamination: f64,

    /// Seed of the random generator.
    pub seed: u64,

    /// How rows with null features are handled.
    pub null_policy: NullPolicy,
}

impl Default for IsolationForestDetector {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.01,
            seed: 42,
            null_policy: NullPolicy::FillZero,
        }
    }
}

impl IsolationForestDetector {
    /// Creates a detector with the given contamination and seed.
    pub fn new(contamination: f64, seed: u64) -> Result<Self> {
        let detector = Self {
            contamination,
            seed,
            ..Self::default()
        };
        detector.validate()?;
        Ok(detector)
    }

    /// Sets the number of trees.
    pub fn with_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    /// Sets the subsample size per tree.
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    /// Sets the null handling policy.
    pub fn with_null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    /// Grows the forest on `points` and returns the anomaly score of each point.
    pub fn anomaly_scores(&self, points: &[Vec<f64>], cancel: &CancellationToken) -> Result<Vec<f64>> {
        let n = points.len();
        let subsample = self.max_samples.min(n);
        let height_limit = (subsample as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            cancel.check(self.name())?;
            let sample = rand::seq::index::sample(&mut rng, n, subsample).into_vec();
            trees.push(IsolationTree::grow(points, sample, height_limit, &mut rng));
        }

        let normalizer = average_path_length(subsample);
        let mut scores = Vec::with_capacity(n);
        for point in points {
            cancel.check(self.name())?;
            let mean_depth =
                trees.iter().map(|t| t.path_length(point)).sum::<f64>() / trees.len() as f64;
            scores.push(if normalizer > 0.0 {
                2f64.powf(-mean_depth / normalizer)
            } else {
                0.5
            });
        }
        Ok(scores)
    }
}

impl OutlierDetector for IsolationForestDetector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::IsolationForest
    }

    fn description(&self) -> &str {
        "Flags rows isolated by few random splits in an ensemble of trees"
    }

    fn validate(&self) -> Result<()> {
        InputValidator::validate_min_count(self.n_estimators, 1, "n_estimators")?;
        InputValidator::validate_min_count(self.max_samples, 2, "max_samples")?;
        InputValidator::validate_contamination(self.contamination)
    }

    #[instrument(
        skip(self, columns, cancel),
        fields(columns = columns.len(), n_estimators = self.n_estimators, seed = self.seed)
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

        let scores = self.anomaly_scores(&matrix.points, cancel)?;
        let cutoff = percentile_sorted(&sorted(&scores), 1.0 - self.contamination)
            .unwrap_or(f64::INFINITY);

        debug!(rows = matrix.points.len(), cutoff, "Scored isolation forest");

        Ok(DetectorVerdict::from_scores(
            self.kind(),
            names,
            row_ids,
            matrix.scatter(row_ids.len(), scores),
            cutoff,
        ))
    }
}

/// Average path length of an unsuccessful search in a binary search tree of `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

/// A single isolation tree stored as an arena of nodes, root first.
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(points: &[Vec<f64>], sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(points, sample, 0, height_limit, rng);
        tree
    }

    fn build(
        &mut self,
        points: &[Vec<f64>],
        indices: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            size: indices.len(),
        });
        if depth >= height_limit || indices.len() <= 1 {
            return id;
        }

        // Only features that still vary can separate the points.
        let dimensions = points[indices[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..dimensions)
            .filter_map(|feature| {
                let (min, max) = indices.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), &i| (lo.min(points[i][feature]), hi.max(points[i][feature])),
                );
                (min < max && min.is_finite() && max.is_finite()).then_some((feature, min, max))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }

        let (feature, min, max) = candidates[rng.random_range(0..candidates.len())];
        // Interpolating keeps the split finite even when `max - min` overflows.
        let u: f64 = rng.random();
        let value = min * (1.0 - u) + max * u;
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| points[i][feature] < value);

        let left = self.build(points, left, depth + 1, height_limit, rng);
        let right = self.build(points, right, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            value,
            left,
            right,
        };
        id
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    value,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *value { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::RowId;

    fn cluster_with_outlier() -> Vec<NumericColumn> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut xs: Vec<f64> = (0..200).map(|_| rng.random_range(-1.0..1.0)).collect();
        let mut ys: Vec<f64> = (0..200).map(|_| rng.random_range(-1.0..1.0)).collect();
        xs.push(25.0);
        ys.push(-25.0);
        vec![
            NumericColumn::from_values("x", xs),
            NumericColumn::from_values("y", ys),
        ]
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn test_far_point_is_flagged() {
        let detector = IsolationForestDetector::default();
        let verdict = detector
            .detect(&cluster_with_outlier(), &CancellationToken::new())
            .unwrap();

        assert!(verdict.anomalies().contains(&RowId(200)));
        assert!(verdict.anomaly_count() <= 3);
        let outlier_score = verdict.rows()[200].score.unwrap();
        assert!(verdict.rows()[..200]
            .iter()
            .all(|r| r.score.unwrap() < outlier_score));
    }

    #[test]
    fn test_same_seed_same_verdict() {
        let columns = cluster_with_outlier();
        let a = IsolationForestDetector::new(0.05, 9)
            .unwrap()
            .detect(&columns, &CancellationToken::new())
            .unwrap();
        let b = IsolationForestDetector::new(0.05, 9)
            .unwrap()
            .detect(&columns, &CancellationToken::new())
            .unwrap();
        assert_eq!(a.rows(), b.rows());
    }

    #[test]
    fn test_extreme_finite_values_do_not_panic() {
        let columns = [NumericColumn::from_values(
            "x",
            vec![-1e308, 1e308, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )];
        let verdict = IsolationForestDetector::default()
            .detect(&columns, &CancellationToken::new())
            .unwrap();

        assert_eq!(verdict.rows().len(), 8);
        assert!(verdict
            .rows()
            .iter()
            .all(|r| r.score.is_some_and(f64::is_finite)));
    }

    #[test]
    fn test_infinite_points_do_not_panic() {
        let mut points: Vec<Vec<f64>> = (0..16).map(|i| vec![i as f64]).collect();
        points.push(vec![f64::INFINITY]);
        points.push(vec![f64::NEG_INFINITY]);
        let scores = IsolationForestDetector::default()
            .anomaly_scores(&points, &CancellationToken::new())
            .unwrap();
        assert_eq!(scores.len(), 18);
    }

    #[test]
    fn test_constant_features_score_uniformly() {
        let points = vec![vec![3.0, 3.0]; 20];
        let scores = IsolationForestDetector::default()
            .anomaly_scores(&points, &CancellationToken::new())
            .unwrap();
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_cancellation_between_trees() {
        let token = CancellationToken::new();
        token.cancel();
        let err = IsolationForestDetector::default()
            .detect(&cluster_with_outlier(), &token)
            .unwrap_err();
        assert!(err.is_strategy_failure());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(IsolationForestDetector::new(0.0, 1).is_err());
        assert!(IsolationForestDetector::default()
            .with_estimators(0)
            .validate()
            .is_err());
        assert!(IsolationForestDetector::default()
            .with_max_samples(1)
            .validate()
            .is_err());
    }
}
