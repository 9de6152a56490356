//! Serializable ensemble configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detectors::{IqrDetector, IsolationForestDetector, Strategy, StrategyKind, ZScoreDetector};
use crate::error::Result;

/// Declarative description of an ensemble run.
///
/// The default selects z-score, IQR and isolation forest with a required
/// agreement of two votes. Missing fields in JSON fall back to these defaults.
///
/// ```rust
/// use term_outlier::ensemble::{EnsembleConfig, EnsembleRunner};
///
/// let config = EnsembleConfig::from_json(
///     r#"{
///         "columns": ["latency"],
///         "strategies": [
///             {"method": "zscore", "threshold": 2.5},
///             {"method": "iqr"}
///         ],
///         "min_agreement": 2
///     }"#,
/// )
/// .unwrap();
/// let runner = EnsembleRunner::from_config(config).unwrap();
/// assert_eq!(runner.voter_count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Columns to score.
    pub columns: Vec<String>,

    /// Strategies to run.
    pub strategies: Vec<Strategy>,

    /// Weighted number of votes required to flag a row.
    pub min_agreement: usize,

    /// Per-strategy vote weights; unlisted strategies weigh 1.0.
    pub weights: BTreeMap<StrategyKind, f64>,

    /// Whether failed strategies are skipped instead of aborting the run.
    pub continue_on_error: bool,

    /// Per-strategy timeout in milliseconds.
    pub timeout_ms: Option<u64>,

    /// Maximum number of strategies running at once; defaults to the CPU count.
    pub max_concurrency: Option<usize>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            strategies: vec![
                ZScoreDetector::default().into(),
                IqrDetector::default().into(),
                IsolationForestDetector::default().into(),
            ],
            min_agreement: 2,
            weights: BTreeMap::new(),
            continue_on_error: true,
            timeout_ms: None,
            max_concurrency: None,
        }
    }
}

impl EnsembleConfig {
    /// Creates the default configuration for the given columns.
    pub fn for_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the configuration to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::EnsembleRunner;

    #[test]
    fn test_default_mirrors_classic_ensemble() {
        let config = EnsembleConfig::for_columns(["a"]);
        let kinds: Vec<StrategyKind> = config.strategies.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::ZScore,
                StrategyKind::Iqr,
                StrategyKind::IsolationForest
            ]
        );
        assert_eq!(config.min_agreement, 2);
        assert!(config.continue_on_error);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EnsembleConfig::from_json(r#"{"columns": ["x", "y"]}"#).unwrap();
        assert_eq!(config.columns, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(config.strategies.len(), 3);

        let runner = EnsembleRunner::from_config(config).unwrap();
        assert_eq!(runner.voter_count(), 5);
    }

    #[test]
    fn test_weights_and_aliases() {
        let config = EnsembleConfig::from_json(
            r#"{
                "columns": ["x"],
                "strategies": [{"method": "mzscore"}, {"method": "lof", "n_neighbors": 5}],
                "min_agreement": 2,
                "weights": {"lof": 2.0},
                "timeout_ms": 500
            }"#,
        )
        .unwrap();
        assert_eq!(config.strategies[0].kind(), StrategyKind::ModifiedZScore);
        assert_eq!(config.weights.get(&StrategyKind::LocalOutlierFactor), Some(&2.0));
        assert_eq!(config.timeout_ms, Some(500));
        assert!(EnsembleRunner::from_config(config).is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = EnsembleConfig::for_columns(["a"]);
        let restored = EnsembleConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(EnsembleConfig::from_json("{not json").is_err());
        assert!(EnsembleConfig::from_json(r#"{"strategies": [{"method": "bogus"}]}"#).is_err());
    }

    #[test]
    fn test_runner_rejects_empty_columns() {
        assert!(EnsembleRunner::from_config(EnsembleConfig::default())
            .unwrap_err()
            .is_configuration());
    }
}
