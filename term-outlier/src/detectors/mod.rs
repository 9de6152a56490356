//! Outlier detection strategies.
//!
//! Every detector turns one column (univariate strategies) or a set of
//! columns (multivariate strategies) into a [`DetectorVerdict`]: one boolean
//! flag per row plus an optional score. Detectors are pure functions of their
//! input and parameters; the multivariate ones that use randomness take an
//! explicit seed.
//!
//! ## Available strategies
//!
//! | Kind | Input | Flags a row when |
//! |------|-------|------------------|
//! | [`ZScoreDetector`] | one column | `|x - mean| / std > threshold` |
//! | [`IqrDetector`] | one column | `x` lies outside `[Q1 - k*IQR, Q3 + k*IQR]` |
//! | [`ModifiedZScoreDetector`] | one column | `|0.6745 * (x - median) / MAD| > threshold` |
//! | [`RollingDetector`] | one ordered column | `x` leaves its centered window's mean ± n·std |
//! | [`SeasonalDetector`] | one ordered column | the decomposition residual's z-score exceeds the threshold |
//! | [`LofDetector`] | several columns | its local outlier factor is in the top contamination share |
//! | [`IsolationForestDetector`] | several columns | its isolation score is in the top contamination share |
//!
//! ## Example
//!
//! ```rust
//! use term_outlier::column::NumericColumn;
//! use term_outlier::detectors::{CancellationToken, OutlierDetector, ZScoreDetector};
//!
//! let column = NumericColumn::from_values("x", vec![1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 100.0]);
//! let detector = ZScoreDetector::new(2.0).unwrap();
//!
//! let verdict = detector.detect(&[column], &CancellationToken::new()).unwrap();
//! assert_eq!(verdict.anomaly_count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::column::{NumericColumn, RowId};
use crate::error::{OutlierError, Result};

mod cancel;
mod iqr;
mod isolation_forest;
mod lof;
mod modified_zscore;
mod rolling;
mod seasonal;
pub mod stats;
mod verdict;
mod zscore;

pub use cancel::CancellationToken;
pub use iqr::IqrDetector;
pub use isolation_forest::IsolationForestDetector;
pub use lof::LofDetector;
pub use modified_zscore::ModifiedZScoreDetector;
pub use rolling::RollingDetector;
pub use seasonal::SeasonalDetector;
pub use verdict::{DetectorVerdict, DetectorWarning, RowVerdict};
pub use zscore::ZScoreDetector;

/// Trait implemented by every detection strategy.
///
/// Detection is synchronous and CPU-bound; the ensemble runner moves it onto
/// blocking worker threads. Long-running detectors poll the cancellation
/// token and return [`OutlierError::Cancelled`] when it fires.
pub trait OutlierDetector: Send + Sync {
    /// Returns the kind of this detector.
    fn kind(&self) -> StrategyKind;

    /// Returns the name of this detector.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Returns a description of this detector.
    fn description(&self) -> &str;

    /// Checks the detector's parameters.
    fn validate(&self) -> Result<()>;

    /// Scores the given columns.
    ///
    /// Univariate detectors expect exactly one column. Multivariate detectors
    /// expect at least one column, all sharing the same row order.
    fn detect(&self, columns: &[NumericColumn], cancel: &CancellationToken)
        -> Result<DetectorVerdict>;
}

/// Identifies a detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "zscore")]
    ZScore,
    #[serde(rename = "iqr")]
    Iqr,
    #[serde(rename = "modified_zscore")]
    ModifiedZScore,
    #[serde(rename = "rolling")]
    Rolling,
    #[serde(rename = "seasonal")]
    Seasonal,
    #[serde(rename = "lof")]
    LocalOutlierFactor,
    #[serde(rename = "isolation_forest")]
    IsolationForest,
}

impl StrategyKind {
    /// All strategy kinds, univariate first.
    pub const ALL: [StrategyKind; 7] = [
        StrategyKind::ZScore,
        StrategyKind::Iqr,
        StrategyKind::ModifiedZScore,
        StrategyKind::Rolling,
        StrategyKind::Seasonal,
        StrategyKind::LocalOutlierFactor,
        StrategyKind::IsolationForest,
    ];

    /// Returns the canonical name used in labels and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ZScore => "zscore",
            StrategyKind::Iqr => "iqr",
            StrategyKind::ModifiedZScore => "modified_zscore",
            StrategyKind::Rolling => "rolling",
            StrategyKind::Seasonal => "seasonal",
            StrategyKind::LocalOutlierFactor => "lof",
            StrategyKind::IsolationForest => "isolation_forest",
        }
    }

    /// Returns true for strategies that score all columns jointly.
    pub fn is_multivariate(&self) -> bool {
        matches!(
            self,
            StrategyKind::LocalOutlierFactor | StrategyKind::IsolationForest
        )
    }

    /// Returns true for strategies that depend on row order.
    pub fn is_order_sensitive(&self) -> bool {
        matches!(self, StrategyKind::Rolling | StrategyKind::Seasonal)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = OutlierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zscore" | "z_score" => Ok(StrategyKind::ZScore),
            "iqr" => Ok(StrategyKind::Iqr),
            "modified_zscore" | "mzscore" => Ok(StrategyKind::ModifiedZScore),
            "rolling" => Ok(StrategyKind::Rolling),
            "seasonal" | "stl" => Ok(StrategyKind::Seasonal),
            "lof" | "local_outlier_factor" => Ok(StrategyKind::LocalOutlierFactor),
            "isolation_forest" | "iforest" => Ok(StrategyKind::IsolationForest),
            other => Err(OutlierError::configuration(format!(
                "Unknown detection method '{other}'"
            ))),
        }
    }
}

/// A configured detection strategy.
///
/// This is the closed set of strategies the ensemble can run. It serializes
/// with a `method` tag so ensemble configurations can be stored as JSON:
///
/// ```rust
/// use term_outlier::detectors::{Strategy, StrategyKind};
///
/// let strategy: Strategy =
///     serde_json::from_str(r#"{"method": "iqr", "multiplier": 3.0}"#).unwrap();
/// assert_eq!(strategy.kind(), StrategyKind::Iqr);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Strategy {
    #[serde(rename = "zscore")]
    ZScore(ZScoreDetector),
    #[serde(rename = "iqr")]
    Iqr(IqrDetector),
    #[serde(rename = "modified_zscore", alias = "mzscore")]
    ModifiedZScore(ModifiedZScoreDetector),
    #[serde(rename = "rolling")]
    Rolling(RollingDetector),
    #[serde(rename = "seasonal", alias = "stl")]
    Seasonal(SeasonalDetector),
    #[serde(rename = "lof")]
    LocalOutlierFactor(LofDetector),
    #[serde(rename = "isolation_forest")]
    IsolationForest(IsolationForestDetector),
}

impl Strategy {
    /// Creates a strategy of the given kind with default parameters.
    ///
    /// # Errors
    ///
    /// The seasonal strategy has no default period and returns a
    /// configuration error; build it with [`SeasonalDetector::new`] instead.
    pub fn from_kind(kind: StrategyKind) -> Result<Self> {
        Ok(match kind {
            StrategyKind::ZScore => Strategy::ZScore(ZScoreDetector::default()),
            StrategyKind::Iqr => Strategy::Iqr(IqrDetector::default()),
            StrategyKind::ModifiedZScore => {
                Strategy::ModifiedZScore(ModifiedZScoreDetector::default())
            }
            StrategyKind::Rolling => Strategy::Rolling(RollingDetector::default()),
            StrategyKind::Seasonal => {
                return Err(OutlierError::configuration(
                    "The seasonal strategy requires an explicit period",
                ))
            }
            StrategyKind::LocalOutlierFactor => Strategy::LocalOutlierFactor(LofDetector::default()),
            StrategyKind::IsolationForest => {
                Strategy::IsolationForest(IsolationForestDetector::default())
            }
        })
    }

    /// Returns the detector behind this strategy.
    pub fn detector(&self) -> &dyn OutlierDetector {
        match self {
            Strategy::ZScore(d) => d,
            Strategy::Iqr(d) => d,
            Strategy::ModifiedZScore(d) => d,
            Strategy::Rolling(d) => d,
            Strategy::Seasonal(d) => d,
            Strategy::LocalOutlierFactor(d) => d,
            Strategy::IsolationForest(d) => d,
        }
    }

    /// Returns the kind of this strategy.
    pub fn kind(&self) -> StrategyKind {
        self.detector().kind()
    }

    /// Returns true for strategies that score all columns jointly.
    pub fn is_multivariate(&self) -> bool {
        self.kind().is_multivariate()
    }

    /// Checks the strategy's parameters.
    pub fn validate(&self) -> Result<()> {
        self.detector().validate()
    }

    /// Runs the strategy over the given columns.
    pub fn detect(
        &self,
        columns: &[NumericColumn],
        cancel: &CancellationToken,
    ) -> Result<DetectorVerdict> {
        self.detector().detect(columns, cancel)
    }
}

macro_rules! impl_from_detector {
    ($($detector:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$detector> for Strategy {
                fn from(detector: $detector) -> Self {
                    Strategy::$variant(detector)
                }
            }
        )*
    };
}

impl_from_detector! {
    ZScoreDetector => ZScore,
    IqrDetector => Iqr,
    ModifiedZScoreDetector => ModifiedZScore,
    RollingDetector => Rolling,
    SeasonalDetector => Seasonal,
    LofDetector => LocalOutlierFactor,
    IsolationForestDetector => IsolationForest,
}

/// Returns the single column a univariate detector works on.
pub(crate) fn single_column(kind: StrategyKind, columns: &[NumericColumn]) -> Result<&NumericColumn> {
    match columns {
        [column] => Ok(column),
        _ => Err(OutlierError::configuration(format!(
            "Strategy '{kind}' scores exactly one column, got {}",
            columns.len()
        ))),
    }
}

/// Converts a degenerate-input error into an all-`false` verdict.
///
/// Any other error passes through unchanged.
pub(crate) fn recover_degenerate(
    kind: StrategyKind,
    columns: Vec<String>,
    row_ids: &[RowId],
    result: Result<DetectorVerdict>,
) -> Result<DetectorVerdict> {
    match result {
        Err(OutlierError::DegenerateInput { column, reason }) => {
            warn!(
                strategy = %kind,
                column = %column,
                reason = %reason,
                "Degenerate input, no rows flagged"
            );
            Ok(DetectorVerdict::degenerate(
                kind,
                columns,
                row_ids,
                DetectorWarning { column, reason },
            ))
        }
        other => other,
    }
}

/// Handling of null values in multivariate detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    /// Replace nulls with zero before fitting.
    #[default]
    FillZero,
    /// Exclude rows with any null feature; they are never flagged.
    DropRows,
}

/// Row-major feature matrix assembled from several columns.
pub(crate) struct FeatureMatrix {
    /// Feature vectors of the usable rows.
    pub points: Vec<Vec<f64>>,
    /// Position in the input of each usable row.
    pub positions: Vec<usize>,
}

impl FeatureMatrix {
    /// Assembles the usable rows of `columns` under `policy`.
    pub fn build(kind: StrategyKind, columns: &[NumericColumn], policy: NullPolicy) -> Result<Self> {
        let first = columns.first().ok_or_else(|| {
            OutlierError::configuration(format!("Strategy '{kind}' requires at least one column"))
        })?;
        if let Some(other) = columns.iter().find(|c| !c.same_row_order(first)) {
            return Err(OutlierError::configuration(format!(
                "Column '{}' is not aligned with column '{}'",
                other.name(),
                first.name()
            )));
        }

        let mut points = Vec::with_capacity(first.len());
        let mut positions = Vec::with_capacity(first.len());
        for row in 0..first.len() {
            let features: Option<Vec<f64>> = columns
                .iter()
                .map(|c| match (c.get(row), policy) {
                    (Some(v), _) => Some(v),
                    (None, NullPolicy::FillZero) => Some(0.0),
                    (None, NullPolicy::DropRows) => None,
                })
                .collect();
            if let Some(features) = features {
                points.push(features);
                positions.push(row);
            }
        }
        Ok(Self { points, positions })
    }

    /// Spreads per-point scores back over all input rows.
    pub fn scatter(&self, num_rows: usize, scores: Vec<f64>) -> Vec<Option<f64>> {
        let mut all = vec![None; num_rows];
        for (&position, score) in self.positions.iter().zip(scores) {
            all[position] = Some(score);
        }
        all
    }
}

/// Returns the column names of a multivariate feature set.
pub(crate) fn column_names(columns: &[NumericColumn]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}
