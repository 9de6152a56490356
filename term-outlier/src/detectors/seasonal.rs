//! Seasonal decomposition residual detection.
//!
//! The series is split into trend, seasonal and residual components with
//! STL (seasonal-trend decomposition by LOESS, Cleveland et al. 1990), and
//! the residual is scored like [`super::ZScoreDetector`] scores raw values.
//! Level shifts and regular seasonal swings end up in the trend and seasonal
//! components, so only values that break the pattern are flagged.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::stats::{is_negligible, mean, median, sample_std, EPSILON};
use super::{
    recover_degenerate, single_column, CancellationToken, DetectorVerdict, OutlierDetector,
    StrategyKind,
};
use crate::column::NumericColumn;
use crate::error::{DegenerateReason, OutlierError, Result};
use crate::security::InputValidator;

const INNER_ITERATIONS: usize = 2;
const ROBUST_PASSES: usize = 6;

fn default_threshold() -> f64 {
    3.0
}

fn default_seasonal_smoothness() -> usize {
    7
}

fn default_robust() -> bool {
    true
}

/// Flags rows whose decomposition residual has a z-score above the threshold.
///
/// The column must be ordered by time, contain no nulls and hold at least
/// two full periods; anything else is a configuration error rather than a
/// silent all-`false` verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalDetector {
    /// Number of rows in one seasonal cycle.
    pub period: usize,

    /// Residual z-score beyond which a value is anomalous.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// LOESS span used to smooth each cycle-subseries (made odd).
    #[serde(default = "default_seasonal_smoothness")]
    pub seasonal_smoothness: usize,

    /// Downweights large residuals between passes so a single spike does not
    /// leak into the seasonal component of neighbouring cycles.
    #[serde(default = "default_robust")]
    pub robust: bool,
}

/// Trend, seasonal and residual components of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub residual: Vec<f64>,
}

impl SeasonalDetector {
    /// Creates a detector for the given period with default parameters.
    pub fn new(period: usize) -> Result<Self> {
        let detector = Self {
            period,
            threshold: default_threshold(),
            seasonal_smoothness: default_seasonal_smoothness(),
            robust: default_robust(),
        };
        detector.validate()?;
        Ok(detector)
    }

    /// Sets the residual z-score threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the cycle-subseries smoothing span.
    pub fn with_seasonal_smoothness(mut self, span: usize) -> Self {
        self.seasonal_smoothness = span;
        self
    }

    /// Enables or disables robustness weighting.
    pub fn with_robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }

    /// Decomposes a complete, time-ordered series.
    ///
    /// # Errors
    /// Returns a configuration error when the series is shorter than two
    /// periods, and `Cancelled` when the token fires between passes.
    pub fn decompose(&self, series: &[f64], cancel: &CancellationToken) -> Result<Decomposition> {
        let n = series.len();
        let p = self.period;
        // Saturates for huge periods, which then fail the length check.
        let min_rows = p.saturating_mul(2);
        if n < min_rows {
            return Err(OutlierError::configuration(format!(
                "Seasonal decomposition with period {p} needs at least {min_rows} rows, got {n}"
            )));
        }

        let ns = odd(self.seasonal_smoothness);
        let nl = odd(p + 1);
        let nt = odd((1.5 * p as f64 / (1.0 - 1.5 / ns as f64)).ceil() as usize);
        let passes = if self.robust { ROBUST_PASSES } else { 1 };

        let mut trend = vec![0.0; n];
        let mut seasonal = vec![0.0; n];
        let mut weights = vec![1.0; n];

        for pass in 0..passes {
            cancel.check(self.name())?;
            for _ in 0..INNER_ITERATIONS {
                let detrended: Vec<f64> = series.iter().zip(&trend).map(|(y, t)| y - t).collect();
                let cycle = smooth_cycle_subseries(&detrended, &weights, p, ns);
                let low = low_pass(&cycle, p, nl);
                for i in 0..n {
                    seasonal[i] = cycle[p + i] - low[i];
                }
                let deseasonalized: Vec<f64> =
                    series.iter().zip(&seasonal).map(|(y, s)| y - s).collect();
                trend = loess_smooth(&deseasonalized, &weights, nt);
            }
            if pass + 1 < passes {
                weights = bisquare_weights(&remainder(series, &seasonal, &trend));
            }
        }

        let residual = remainder(series, &seasonal, &trend);
        Ok(Decomposition {
            trend,
            seasonal,
            residual,
        })
    }

    fn score(&self, column: &NumericColumn, cancel: &CancellationToken) -> Result<DetectorVerdict> {
        let nulls = column.null_count();
        if nulls == column.len() {
            return Err(OutlierError::degenerate(column.name(), DegenerateReason::AllNull));
        }
        if nulls > 0 {
            return Err(OutlierError::configuration(format!(
                "Seasonal decomposition needs a complete series, column '{}' has {nulls} null values",
                column.name()
            )));
        }

        let series = column.non_null_values();
        let decomposition = self.decompose(&series, cancel)?;
        let residual = &decomposition.residual;

        let mean = mean(residual)
            .ok_or_else(|| OutlierError::degenerate(column.name(), DegenerateReason::TooFewRows))?;
        let std = sample_std(residual, mean)
            .ok_or_else(|| OutlierError::degenerate(column.name(), DegenerateReason::TooFewRows))?;
        if is_negligible(std, mean) {
            return Err(OutlierError::degenerate(
                column.name(),
                DegenerateReason::ZeroVariance,
            ));
        }

        debug!(
            column = %column.name(),
            period = self.period,
            residual_mean = mean,
            residual_std = std,
            "Decomposed series"
        );

        let scores = residual
            .iter()
            .map(|r| Some((r - mean).abs() / std))
            .collect();
        Ok(DetectorVerdict::from_scores(
            self.kind(),
            vec![column.name().to_string()],
            column.row_ids(),
            scores,
            self.threshold,
        ))
    }
}

impl OutlierDetector for SeasonalDetector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Seasonal
    }

    fn description(&self) -> &str {
        "Flags values whose seasonal decomposition residual is extreme"
    }

    fn validate(&self) -> Result<()> {
        InputValidator::validate_min_count(self.period, 2, "period")?;
        InputValidator::validate_min_count(self.seasonal_smoothness, 3, "seasonal_smoothness")?;
        InputValidator::validate_positive(self.threshold, "threshold")
    }

    #[instrument(skip(self, columns, cancel), fields(period = self.period))]
    fn detect(
        &self,
        columns: &[NumericColumn],
        cancel: &CancellationToken,
    ) -> Result<DetectorVerdict> {
        let column = single_column(self.kind(), columns)?;
        recover_degenerate(
            self.kind(),
            vec![column.name().to_string()],
            column.row_ids(),
            self.score(column, cancel),
        )
    }
}

fn odd(n: usize) -> usize {
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

fn remainder(series: &[f64], seasonal: &[f64], trend: &[f64]) -> Vec<f64> {
    series
        .iter()
        .zip(seasonal)
        .zip(trend)
        .map(|((y, s), t)| y - s - t)
        .collect()
}

/// Smooths every cycle-subseries and extends each one by a point on both
/// ends, so the result has `n + 2 * period` values.
fn smooth_cycle_subseries(detrended: &[f64], weights: &[f64], period: usize, span: usize) -> Vec<f64> {
    let mut cycle = vec![0.0; detrended.len() + 2 * period];
    for phase in 0..period {
        let values: Vec<f64> = detrended.iter().skip(phase).step_by(period).copied().collect();
        let robustness: Vec<f64> = weights.iter().skip(phase).step_by(period).copied().collect();
        for k in 0..values.len() + 2 {
            cycle[phase + k * period] = loess_at(&values, &robustness, span, k as f64 - 1.0);
        }
    }
    cycle
}

/// Moving averages of length `period`, `period` and 3 followed by LOESS.
///
/// Takes the extended cycle series and returns exactly `n` values.
fn low_pass(cycle: &[f64], period: usize, span: usize) -> Vec<f64> {
    let smoothed = moving_average(&moving_average(&moving_average(cycle, period), period), 3);
    let unit = vec![1.0; smoothed.len()];
    loess_smooth(&smoothed, &unit, span)
}

fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

fn loess_smooth(values: &[f64], robustness: &[f64], span: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| loess_at(values, robustness, span, i as f64))
        .collect()
}

/// Local linear LOESS fit evaluated at position `x`.
///
/// Uses the `span` points nearest to `x` with tricube distance weights
/// multiplied by the robustness weights. Falls back to ignoring robustness
/// when every neighbour has been downweighted to zero.
fn loess_at(values: &[f64], robustness: &[f64], span: usize, x: f64) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let q = span.clamp(1, n);
    let start = (x.round() as isize - (q / 2) as isize).clamp(0, (n - q) as isize) as usize;
    let end = start + q;
    let reach = (x - start as f64).abs().max((x - (end - 1) as f64).abs())
        + 1.0
        + (span.saturating_sub(n) / 2) as f64;

    let fit = |use_robustness: bool| {
        let mut fit = LocalLinear::default();
        for j in start..end {
            let offset = j as f64 - x;
            let mut w = tricube(offset.abs() / reach);
            if use_robustness {
                w *= robustness[j];
            }
            fit.add(offset, values[j], w);
        }
        fit.value_at_origin()
    };

    fit(true)
        .or_else(|| fit(false))
        .unwrap_or_else(|| values[start.min(n - 1)])
}

fn tricube(u: f64) -> f64 {
    if u < 1.0 {
        (1.0 - u.powi(3)).powi(3)
    } else {
        0.0
    }
}

#[derive(Default)]
struct LocalLinear {
    sw: f64,
    sx: f64,
    sy: f64,
    sxx: f64,
    sxy: f64,
}

impl LocalLinear {
    fn add(&mut self, x: f64, y: f64, w: f64) {
        self.sw += w;
        self.sx += w * x;
        self.sy += w * y;
        self.sxx += w * x * x;
        self.sxy += w * x * y;
    }

    fn value_at_origin(&self) -> Option<f64> {
        if self.sw <= EPSILON {
            return None;
        }
        let denom = self.sw * self.sxx - self.sx * self.sx;
        if denom.abs() <= EPSILON * self.sw * self.sw {
            return Some(self.sy / self.sw);
        }
        let slope = (self.sw * self.sxy - self.sx * self.sy) / denom;
        Some((self.sy - slope * self.sx) / self.sw)
    }
}

fn bisquare_weights(residual: &[f64]) -> Vec<f64> {
    let abs: Vec<f64> = residual.iter().map(|r| r.abs()).collect();
    let h = 6.0 * median(&abs).unwrap_or(0.0);
    if h <= EPSILON {
        return vec![1.0; residual.len()];
    }
    abs.iter()
        .map(|&r| {
            let u = r / h;
            if u < 1.0 {
                (1.0 - u * u).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::RowId;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn seasonal_series(len: usize, period: usize, amplitude: f64, slope: f64) -> Vec<f64> {
        (0..len)
            .map(|i| {
                10.0 + slope * i as f64
                    + amplitude * (2.0 * PI * i as f64 / period as f64).sin()
            })
            .collect()
    }

    #[test]
    fn test_decomposition_recovers_clean_components() {
        let series = seasonal_series(96, 12, 2.0, 0.05);
        let detector = SeasonalDetector::new(12).unwrap().with_robust(false);
        let parts = detector.decompose(&series, &CancellationToken::new()).unwrap();

        for i in 0..series.len() {
            let rebuilt = parts.trend[i] + parts.seasonal[i] + parts.residual[i];
            assert!((rebuilt - series[i]).abs() < 1e-9);
            assert!(parts.residual[i].abs() < 1e-6, "residual at {i}");
        }
        let expected = 2.0 * (2.0 * PI * 3.0 / 12.0).sin();
        assert!((parts.seasonal[27] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_flags_spike_that_breaks_the_pattern() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut series = seasonal_series(120, 12, 2.0, 0.0);
        for value in series.iter_mut() {
            *value += rng.random_range(-0.3..0.3);
        }
        series[50] += 10.0;

        let verdict = SeasonalDetector::new(12)
            .unwrap()
            .detect(
                &[NumericColumn::from_values("sales", series)],
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(verdict.anomalies(), vec![RowId(50)]);
        assert_eq!(verdict.strategy(), StrategyKind::Seasonal);
    }

    #[test]
    fn test_seasonal_peaks_are_not_anomalies() {
        let mut rng = StdRng::seed_from_u64(11);
        let series: Vec<f64> = seasonal_series(96, 12, 8.0, 0.1)
            .into_iter()
            .map(|v| v + rng.random_range(-0.3..0.3))
            .collect();

        let verdict = SeasonalDetector::new(12)
            .unwrap()
            .detect(
                &[NumericColumn::from_values("sales", series)],
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(verdict.anomaly_count(), 0);
    }

    #[test]
    fn test_insufficient_data_is_configuration_error() {
        let column = NumericColumn::from_values("x", seasonal_series(23, 12, 1.0, 0.0));
        let err = SeasonalDetector::new(12)
            .unwrap()
            .detect(&[column], &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_nulls() {
        let mut values: Vec<Option<f64>> =
            seasonal_series(48, 12, 1.0, 0.0).into_iter().map(Some).collect();
        values[5] = None;
        let err = SeasonalDetector::new(12)
            .unwrap()
            .detect(
                &[NumericColumn::from_options("x", values)],
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(err.is_configuration());

        let verdict = SeasonalDetector::new(12)
            .unwrap()
            .detect(
                &[NumericColumn::from_options("x", vec![None; 48])],
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(verdict.warnings()[0].reason, DegenerateReason::AllNull);
    }

    #[test]
    fn test_cancelled_before_first_pass() {
        let token = CancellationToken::new();
        token.cancel();
        let err = SeasonalDetector::new(12)
            .unwrap()
            .decompose(&seasonal_series(48, 12, 1.0, 0.0), &token)
            .unwrap_err();
        assert!(matches!(err, OutlierError::Cancelled { .. }));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SeasonalDetector::new(1).is_err());
        assert!(SeasonalDetector::new(12)
            .unwrap()
            .with_seasonal_smoothness(1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_huge_period_is_a_configuration_error() {
        let detector = SeasonalDetector::new(usize::MAX).unwrap();
        let series = seasonal_series(48, 12, 5.0, 0.1);
        let err = detector
            .decompose(&series, &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_configuration());

        let column = NumericColumn::from_values("load", series);
        let err = detector
            .detect(std::slice::from_ref(&column), &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
