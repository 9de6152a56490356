//! Concurrent execution of an ensemble over a dataset.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use super::combiner::{voter_label, EnsembleCombiner};
use super::config::EnsembleConfig;
use super::result::{EnsembleResult, RunMetadata, SkippedStrategy};
use crate::column::NumericColumn;
use crate::dataset::Dataset;
use crate::detectors::{CancellationToken, DetectorVerdict, Strategy, StrategyKind};
use crate::error::{OutlierError, Result};
use crate::logging::LogConfig;

/// Runs a set of detection strategies over selected columns and combines
/// their votes.
///
/// Univariate strategies vote once per column, multivariate strategies once
/// over all columns. Every vote runs on the blocking thread pool, bounded by
/// `max_concurrency`, and the results are joined before combining.
///
/// Failure handling:
/// - configuration errors (unknown columns, insufficient data for the
///   seasonal strategy, unreachable `min_agreement`) abort the run;
/// - a strategy that fails, times out or is cancelled is reported in
///   [`EnsembleResult::skipped`] and excluded from the agreement count,
///   unless `continue_on_error(false)` asks for all-or-nothing semantics.
///
/// # Example
///
/// ```rust
/// use term_outlier::dataset::Dataset;
/// use term_outlier::detectors::{IqrDetector, ZScoreDetector};
/// use term_outlier::ensemble::EnsembleRunner;
///
/// # async fn example() -> term_outlier::error::Result<()> {
/// let dataset = Dataset::from_columns(vec![(
///     "x",
///     vec![1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 100.0].into_iter().map(Some).collect(),
/// )])?;
///
/// let runner = EnsembleRunner::builder()
///     .column("x")
///     .strategy(ZScoreDetector::new(2.0)?)
///     .strategy(IqrDetector::default())
///     .min_agreement(2)
///     .build()?;
///
/// let result = runner.run(&dataset).await?;
/// assert_eq!(result.anomaly_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EnsembleRunner {
    columns: Vec<String>,
    strategies: Vec<Strategy>,
    combiner: EnsembleCombiner,
    timeout: Option<Duration>,
    continue_on_error: bool,
    max_concurrency: usize,
    cancellation: CancellationToken,
    log_config: LogConfig,
}

/// One scheduled strategy invocation.
struct PlannedVoter {
    label: String,
    strategy: Strategy,
    columns: Vec<NumericColumn>,
}

impl EnsembleRunner {
    /// Creates a builder.
    pub fn builder() -> EnsembleRunnerBuilder {
        EnsembleRunnerBuilder::default()
    }

    /// Creates a runner from a serializable configuration.
    pub fn from_config(config: EnsembleConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .columns(config.columns)
            .min_agreement(config.min_agreement)
            .continue_on_error(config.continue_on_error);
        for strategy in config.strategies {
            builder = builder.strategy(strategy);
        }
        for (kind, weight) in config.weights {
            builder = builder.weight(kind, weight);
        }
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(n) = config.max_concurrency {
            builder = builder.max_concurrency(n);
        }
        builder.build()
    }

    /// Returns the selected columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the configured strategies.
    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Returns the number of votes a run will collect.
    pub fn voter_count(&self) -> usize {
        self.strategies
            .iter()
            .map(|s| if s.is_multivariate() { 1 } else { self.columns.len() })
            .sum()
    }

    /// Returns the cancellation token observed by every strategy.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    fn plan(&self, columns: &[NumericColumn]) -> Vec<PlannedVoter> {
        let mut plan = Vec::with_capacity(self.voter_count());
        for strategy in &self.strategies {
            if strategy.is_multivariate() {
                plan.push(PlannedVoter {
                    label: voter_label(strategy.kind(), None),
                    strategy: strategy.clone(),
                    columns: columns.to_vec(),
                });
            } else {
                for column in columns {
                    plan.push(PlannedVoter {
                        label: voter_label(strategy.kind(), Some(column.name())),
                        strategy: strategy.clone(),
                        columns: vec![column.clone()],
                    });
                }
            }
        }
        plan
    }

    /// Runs every strategy over the dataset and combines the votes.
    #[instrument(skip(self, dataset), fields(rows = dataset.num_rows(), voters = self.voter_count()))]
    pub async fn run(&self, dataset: &Dataset) -> Result<EnsembleResult> {
        let mut metadata = RunMetadata::default();
        metadata.record_start();
        info!(
            columns = ?self.columns,
            strategies = self.strategies.len(),
            "Starting ensemble run"
        );

        let columns = dataset.select(&self.columns)?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let tasks = self.plan(&columns).into_iter().map(|voter| {
            let semaphore = Arc::clone(&semaphore);
            let token = self.cancellation.child_token();
            let timeout = self.timeout;
            async move {
                let kind = voter.strategy.kind();
                let label = voter.label.clone();
                let outcome = execute(voter, semaphore, token, timeout).await;
                (label, kind, outcome)
            }
        });
        let outcomes = join_all(tasks).await;

        if self.cancellation.is_cancelled() {
            if !self.continue_on_error {
                return Err(OutlierError::cancelled("ensemble"));
            }
            warn!("Ensemble run cancelled, combining the voters that finished");
        }

        let mut voters = Vec::with_capacity(outcomes.len());
        let mut skipped = Vec::new();
        for (label, kind, outcome) in outcomes {
            match outcome {
                Ok(verdict) => {
                    crate::log_detector!(
                        self.log_config,
                        voter = %label,
                        anomalies = verdict.anomaly_count(),
                        degenerate = verdict.is_degenerate(),
                        "Voter finished"
                    );
                    voters.push((label, verdict));
                }
                Err(e) if e.is_configuration() || !self.continue_on_error => {
                    warn!(voter = %label, error = %e, "Aborting ensemble run");
                    return Err(e);
                }
                Err(e) => {
                    warn!(voter = %label, error = %e, "Skipping strategy");
                    skipped.push(SkippedStrategy {
                        voter: label,
                        strategy: kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let result = self.combiner.combine(voters, skipped)?;
        metadata.record_end();
        metadata.add_custom("rows", dataset.num_rows().to_string());
        let result = result.with_metadata(metadata);

        if self.log_config.log_scores {
            for row_id in result.anomalies() {
                if let Some(row) = result.row(row_id) {
                    crate::perf_debug!(
                        self.log_config,
                        row_id = %row.row_id,
                        agreement = row.agreement,
                        "Flagged row"
                    );
                }
            }
        }

        info!(
            anomalies = result.anomaly_count(),
            skipped = result.skipped().len(),
            duration_ms = result.summary().duration_ms,
            "Ensemble run completed"
        );
        Ok(result)
    }
}

/// Runs one voter on the blocking pool under the concurrency limit and timeout.
async fn execute(
    voter: PlannedVoter,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    timeout: Option<Duration>,
) -> Result<DetectorVerdict> {
    let permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| OutlierError::Internal(format!("Concurrency limiter closed: {e}")))?;

    let PlannedVoter {
        label,
        strategy,
        columns,
    } = voter;
    let task_token = token.clone();
    // The permit lives as long as the blocking work, which can outlast a timeout.
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        strategy.detect(&columns, &task_token)
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                token.cancel();
                return Err(OutlierError::Timeout {
                    strategy: label,
                    timeout_ms: limit.as_millis() as u64,
                });
            }
        },
        None => handle.await,
    };

    joined.map_err(|e| OutlierError::strategy_failed(label, e.to_string()))?
}

/// Builder for [`EnsembleRunner`].
#[derive(Debug, Clone)]
pub struct EnsembleRunnerBuilder {
    columns: Vec<String>,
    strategies: Vec<Strategy>,
    min_agreement: usize,
    weights: Vec<(StrategyKind, f64)>,
    timeout: Option<Duration>,
    continue_on_error: bool,
    max_concurrency: usize,
    cancellation: CancellationToken,
    log_config: LogConfig,
}

impl Default for EnsembleRunnerBuilder {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            strategies: Vec::new(),
            min_agreement: 1,
            weights: Vec::new(),
            timeout: None,
            continue_on_error: true,
            max_concurrency: num_cpus::get(),
            cancellation: CancellationToken::new(),
            log_config: LogConfig::default(),
        }
    }
}

impl EnsembleRunnerBuilder {
    /// Adds a column to score.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    /// Adds several columns to score.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Adds a strategy.
    pub fn strategy(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategies.push(strategy.into());
        self
    }

    /// Sets the weighted number of votes required to flag a row.
    pub fn min_agreement(mut self, min_agreement: usize) -> Self {
        self.min_agreement = min_agreement;
        self
    }

    /// Sets the vote weight of a strategy (default 1.0).
    pub fn weight(mut self, strategy: StrategyKind, weight: f64) -> Self {
        self.weights.push((strategy, weight));
        self
    }

    /// Sets a per-strategy timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets whether failed strategies are skipped (default) or abort the run.
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Sets the maximum number of strategies running at once.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Uses a caller-owned cancellation token.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the logging configuration.
    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log_config = config;
        self
    }

    /// Validates the configuration and builds the runner.
    pub fn build(self) -> Result<EnsembleRunner> {
        if self.columns.is_empty() {
            return Err(OutlierError::configuration(
                "At least one column must be selected",
            ));
        }
        let mut seen_columns = HashSet::new();
        if let Some(dup) = self.columns.iter().find(|c| !seen_columns.insert(c.as_str())) {
            return Err(OutlierError::configuration(format!(
                "Column '{dup}' is selected more than once"
            )));
        }
        if self.strategies.is_empty() {
            return Err(OutlierError::configuration(
                "At least one strategy must be configured",
            ));
        }
        let mut seen_kinds = HashSet::new();
        for strategy in &self.strategies {
            strategy.validate()?;
            if !seen_kinds.insert(strategy.kind()) {
                return Err(OutlierError::configuration(format!(
                    "Strategy '{}' is configured more than once",
                    strategy.kind()
                )));
            }
        }
        if self.max_concurrency == 0 {
            return Err(OutlierError::configuration(
                "max_concurrency must be at least 1",
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(OutlierError::configuration("timeout must be positive"));
        }

        let mut combiner = EnsembleCombiner::new(self.min_agreement)?;
        for (kind, weight) in self.weights {
            combiner = combiner.with_weight(kind, weight)?;
        }

        let columns = self.columns;
        let voter_kinds = self.strategies.iter().flat_map(|s| {
            let votes = if s.is_multivariate() { 1 } else { columns.len() };
            std::iter::repeat(s.kind()).take(votes)
        });
        combiner.check_satisfiable(voter_kinds)?;

        Ok(EnsembleRunner {
            columns,
            strategies: self.strategies,
            combiner,
            timeout: self.timeout,
            continue_on_error: self.continue_on_error,
            max_concurrency: self.max_concurrency,
            cancellation: self.cancellation,
            log_config: self.log_config,
        })
    }
}
