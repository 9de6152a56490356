//! Property-based tests for detectors and vote combination.
//!
//! These check invariants that must hold for any input:
//! - constant columns never produce anomalies
//! - every verdict and ensemble result covers the full row universe
//! - flags agree with scores and expected ranges
//! - raising `min_agreement` never adds anomalies
//! - seeded and neighbour-based strategies are reproducible

use proptest::prelude::*;
use term_outlier::column::{NumericColumn, RowId};
use term_outlier::detectors::{
    CancellationToken, DetectorVerdict, IqrDetector, IsolationForestDetector, LofDetector,
    ModifiedZScoreDetector, OutlierDetector, RollingDetector, ZScoreDetector,
};
use term_outlier::ensemble::EnsembleCombiner;

fn finite_values() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e6..1.0e6f64, 3..60)
}

fn nullable_values() -> impl Strategy<Value = Vec<Option<f64>>> {
    prop::collection::vec(prop::option::weighted(0.85, -1.0e3..1.0e3f64), 3..60)
}

fn univariate_detectors() -> Vec<term_outlier::detectors::Strategy> {
    vec![
        ZScoreDetector::default().into(),
        IqrDetector::default().into(),
        ModifiedZScoreDetector::default().into(),
        RollingDetector::default().into(),
    ]
}

proptest! {
    #[test]
    fn prop_constant_columns_have_no_anomalies(value in -1.0e6..1.0e6f64, len in 2usize..50) {
        let column = NumericColumn::from_values("c", vec![value; len]);
        for strategy in univariate_detectors() {
            let verdict = strategy
                .detect(std::slice::from_ref(&column), &CancellationToken::new())
                .unwrap();
            prop_assert_eq!(verdict.anomaly_count(), 0);
            prop_assert_eq!(verdict.len(), len);
        }
    }

    #[test]
    fn prop_verdicts_cover_every_row(values in nullable_values()) {
        let column = NumericColumn::from_options("v", values.clone());
        for strategy in univariate_detectors() {
            let verdict = strategy
                .detect(std::slice::from_ref(&column), &CancellationToken::new())
                .unwrap();
            prop_assert_eq!(verdict.len(), values.len());
            for (row, value) in verdict.rows().iter().zip(&values) {
                if value.is_none() {
                    prop_assert!(!row.is_anomaly);
                    prop_assert!(row.score.is_none());
                }
            }
        }
    }

    #[test]
    fn prop_zscore_flags_match_scores(values in finite_values(), threshold in 0.5..4.0f64) {
        let verdict = ZScoreDetector::new(threshold)
            .unwrap()
            .detect(&[NumericColumn::from_values("v", values)], &CancellationToken::new())
            .unwrap();
        for row in verdict.rows() {
            match row.score {
                Some(score) => prop_assert_eq!(row.is_anomaly, score > threshold),
                None => prop_assert!(!row.is_anomaly),
            }
        }
    }

    #[test]
    fn prop_iqr_flags_lie_outside_fences(values in finite_values()) {
        let column = NumericColumn::from_values("v", values.clone());
        let verdict = IqrDetector::default()
            .detect(&[column], &CancellationToken::new())
            .unwrap();
        if let Some((lower, upper)) = verdict.expected_range() {
            for (row, value) in verdict.rows().iter().zip(&values) {
                prop_assert_eq!(row.is_anomaly, *value < lower || *value > upper);
            }
        } else {
            prop_assert_eq!(verdict.anomaly_count(), 0);
        }
    }

    #[test]
    fn prop_higher_agreement_never_adds_anomalies(values in finite_values()) {
        let columns = vec![NumericColumn::from_values("v", values)];
        let token = CancellationToken::new();
        let verdicts: Vec<DetectorVerdict> = vec![
            ZScoreDetector::new(1.5).unwrap().detect(&columns, &token).unwrap(),
            IqrDetector::default().detect(&columns, &token).unwrap(),
            ModifiedZScoreDetector::default().detect(&columns, &token).unwrap(),
        ];

        let mut previous: Option<Vec<RowId>> = None;
        for min_agreement in 1..=3 {
            let result = EnsembleCombiner::new(min_agreement)
                .unwrap()
                .combine_verdicts(verdicts.clone())
                .unwrap();
            prop_assert_eq!(result.rows().len(), columns[0].len());
            let anomalies = result.anomalies();
            if let Some(previous) = &previous {
                prop_assert!(anomalies.iter().all(|id| previous.contains(id)));
            }
            previous = Some(anomalies);
        }
    }

    #[test]
    fn prop_isolation_forest_is_reproducible(
        xs in prop::collection::vec(-100.0..100.0f64, 10..40),
        seed in any::<u64>(),
    ) {
        let ys: Vec<f64> = xs.iter().map(|x| x * 0.5 + 1.0).collect();
        let columns = vec![
            NumericColumn::from_values("x", xs),
            NumericColumn::from_values("y", ys),
        ];
        let detector = IsolationForestDetector::new(0.1, seed).unwrap().with_estimators(20);
        let a = detector.detect(&columns, &CancellationToken::new()).unwrap();
        let b = detector.detect(&columns, &CancellationToken::new()).unwrap();
        prop_assert_eq!(a.rows(), b.rows());
    }

    #[test]
    fn prop_lof_is_reproducible(
        grid in prop::collection::vec((0i32..4, 0i32..4), 10..40),
    ) {
        // A 4x4 grid forces duplicate points and equal neighbour distances.
        let (xs, ys): (Vec<f64>, Vec<f64>) =
            grid.iter().map(|&(x, y)| (f64::from(x), f64::from(y))).unzip();
        let columns = vec![
            NumericColumn::from_values("x", xs),
            NumericColumn::from_values("y", ys),
        ];
        let detector = LofDetector::new(3, 0.1).unwrap();
        let a = detector.detect(&columns, &CancellationToken::new()).unwrap();
        let b = detector.detect(&columns, &CancellationToken::new()).unwrap();
        prop_assert_eq!(a.rows(), b.rows());
        prop_assert_eq!(a.anomalies(), b.anomalies());
    }

    #[test]
    fn prop_contamination_bounds_flag_count(
        xs in prop::collection::vec(-100.0..100.0f64, 10..40),
        contamination in 0.05..0.5f64,
    ) {
        let n = xs.len();
        let columns = vec![NumericColumn::from_values("x", xs)];
        let verdict = LofDetector::new(3, contamination)
            .unwrap()
            .detect(&columns, &CancellationToken::new())
            .unwrap();
        // Only scores strictly above the (1 - contamination) percentile are flagged.
        let position = ((1.0 - contamination) * (n - 1) as f64).floor() as usize;
        let bound = n - 1 - position;
        prop_assert!(verdict.anomaly_count() <= bound);
    }
}
