//! Descriptive statistics shared by the detectors.
//!
//! Conventions follow the usual dataframe semantics: standard deviations are
//! sample estimates (`n - 1` denominator) and percentiles use linear
//! interpolation between closest ranks.

/// Relative tolerance below which a dispersion estimate counts as zero.
pub(crate) const EPSILON: f64 = 1e-10;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation around `mean`, `None` for fewer than two values.
pub fn sample_std(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Returns true when `dispersion` is zero relative to the magnitude of `center`.
pub fn is_negligible(dispersion: f64, center: f64) -> bool {
    dispersion <= EPSILON * center.abs().max(1.0)
}

/// Returns a sorted copy of `values`.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Percentile `p` in `[0, 1]` of already sorted values.
///
/// The result interpolates linearly between the two ranks surrounding the
/// fractional position `p * (n - 1)`.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let position = p * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Median of unsorted values.
pub fn median(values: &[f64]) -> Option<f64> {
    percentile_sorted(&sorted(values), 0.5)
}

/// Median absolute deviation around `center` (unscaled).
pub fn median_absolute_deviation(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_sample_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values).unwrap();
        assert!((m - 5.0).abs() < 1e-12);
        let s = sample_std(&values, m).unwrap();
        assert!((s - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert!(sample_std(&[1.0], 1.0).is_none());
        assert!(mean(&[]).is_none());
    }

    #[test]
    fn test_linear_percentiles() {
        let values = sorted(&[1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 100.0]);
        assert!((percentile_sorted(&values, 0.25).unwrap() - 1.75).abs() < 1e-12);
        assert!((percentile_sorted(&values, 0.75).unwrap() - 2.25).abs() < 1e-12);
        assert_eq!(percentile_sorted(&values, 0.0), Some(1.0));
        assert_eq!(percentile_sorted(&values, 1.0), Some(100.0));
        assert!(percentile_sorted(&[], 0.5).is_none());
    }

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));

        let values = [1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 100.0];
        let med = median(&values).unwrap();
        assert_eq!(med, 2.0);
        assert_eq!(median_absolute_deviation(&values, med), Some(0.5));
    }

    #[test]
    fn test_negligible_dispersion() {
        assert!(is_negligible(0.0, 5.0));
        assert!(is_negligible(1e-12, 1.0));
        assert!(!is_negligible(1e-3, 1.0));
        assert!(is_negligible(1e-6, 1e6));
    }
}
