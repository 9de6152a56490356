//! Integration tests for ensemble runs over in-memory datasets.

use arrow::array::{Array, Int64Array};
use datafusion::prelude::*;
use term_outlier::ensemble::{EnsembleCombiner, SkippedStrategy};
use term_outlier::prelude::*;

fn scenario_dataset() -> Dataset {
    Dataset::from_columns(vec![(
        "x",
        vec![1.0, 2.0, 2.0, 3.0, 2.0, 2.0, 1.0, 100.0]
            .into_iter()
            .map(Some)
            .collect(),
    )])
    .unwrap()
}

fn grid_with_outlier() -> Dataset {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for i in 0..5 {
        for j in 0..4 {
            xs.push(Some(i as f64));
            ys.push(Some(j as f64));
        }
    }
    xs.push(Some(10.0));
    ys.push(Some(10.0));
    Dataset::from_columns(vec![("x", xs), ("y", ys)]).unwrap()
}

#[tokio::test]
async fn test_spike_flagged_when_two_strategies_agree() {
    let runner = EnsembleRunner::builder()
        .column("x")
        .strategy(ZScoreDetector::new(2.0).unwrap())
        .strategy(IqrDetector::default())
        .min_agreement(2)
        .build()
        .unwrap();

    let result = runner.run(&scenario_dataset()).await.unwrap();

    assert_eq!(result.anomalies(), vec![RowId(7)]);
    let spike = result.row(RowId(7)).unwrap();
    assert_eq!(spike.flag_count, 2);
    assert!(spike.votes[0].score.unwrap() > 2.0);
    assert!(spike.votes[1].score.is_none());
    for row in result.rows().iter().filter(|r| r.row_id != RowId(7)) {
        assert_eq!(row.flag_count, 0);
        assert!(!row.is_anomaly);
    }
}

#[tokio::test]
async fn test_default_threshold_needs_stronger_evidence() {
    // Eight rows cannot produce a sample z-score above (n - 1) / sqrt(n).
    let runner = EnsembleRunner::builder()
        .column("x")
        .strategy(ZScoreDetector::default())
        .strategy(IqrDetector::default())
        .min_agreement(2)
        .build()
        .unwrap();

    let result = runner.run(&scenario_dataset()).await.unwrap();
    assert_eq!(result.anomaly_count(), 0);
    assert_eq!(result.vote(RowId(7), "x_iqr").map(|v| v.is_anomaly), Some(true));
    assert_eq!(result.vote(RowId(7), "x_zscore").map(|v| v.is_anomaly), Some(false));
}

#[tokio::test]
async fn test_multivariate_strategies_agree_on_isolated_point() {
    let runner = EnsembleRunner::builder()
        .columns(["x", "y"])
        .strategy(LofDetector::new(5, 0.05).unwrap())
        .strategy(IsolationForestDetector::new(0.05, 42).unwrap())
        .min_agreement(2)
        .build()
        .unwrap();

    let result = runner.run(&grid_with_outlier()).await.unwrap();

    assert_eq!(result.anomalies(), vec![RowId(20)]);
    let labels: Vec<&str> = result.voters().iter().map(|v| v.label.as_str()).collect();
    assert_eq!(labels, vec!["lof", "isolation_forest"]);
}

#[tokio::test]
async fn test_mixed_ensemble_covers_every_row() {
    let dataset = grid_with_outlier();
    let runner = EnsembleRunner::from_config(EnsembleConfig::for_columns(["x", "y"])).unwrap();
    assert_eq!(runner.voter_count(), 5);

    let result = runner.run(&dataset).await.unwrap();
    assert_eq!(result.rows().len(), dataset.num_rows());
    let ids: Vec<RowId> = result.rows().iter().map(|r| r.row_id).collect();
    assert_eq!(ids, dataset.row_ids());
    for row in result.rows() {
        assert_eq!(row.votes.len(), 5);
        assert_eq!(row.is_anomaly, row.flag_count >= 2);
    }
}

#[tokio::test]
async fn test_result_table_is_queryable() {
    let runner = EnsembleRunner::builder()
        .column("x")
        .strategy(ZScoreDetector::new(2.0).unwrap())
        .strategy(IqrDetector::default())
        .strategy(ModifiedZScoreDetector::default())
        .min_agreement(2)
        .build()
        .unwrap();
    let result = runner.run(&scenario_dataset()).await.unwrap();

    let batch = result.to_record_batch().unwrap();
    let names: Vec<String> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(
        names,
        vec![
            "row_id",
            "x_zscore",
            "x_zscore_score",
            "x_iqr",
            "x_modified_zscore",
            "x_modified_zscore_score",
            "agreement",
            "is_anomaly",
        ]
    );

    let ctx = SessionContext::new();
    ctx.register_batch("anomalies", batch).unwrap();
    let flagged = ctx
        .sql("SELECT row_id FROM anomalies WHERE is_anomaly ORDER BY row_id")
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    let ids: Vec<i64> = flagged
        .iter()
        .flat_map(|b| {
            let column = b.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
            (0..column.len()).map(|i| column.value(i)).collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(ids, vec![7]);
}

#[tokio::test]
async fn test_nulls_never_vote() {
    let dataset = Dataset::from_columns(vec![(
        "x",
        vec![
            Some(1.0),
            Some(2.0),
            None,
            Some(2.0),
            Some(3.0),
            Some(2.0),
            Some(1.0),
            Some(100.0),
        ],
    )])
    .unwrap();
    let runner = EnsembleRunner::builder()
        .column("x")
        .strategy(ZScoreDetector::new(2.0).unwrap())
        .strategy(IqrDetector::default())
        .strategy(ModifiedZScoreDetector::default())
        .build()
        .unwrap();

    let result = runner.run(&dataset).await.unwrap();
    let null_row = result.row(RowId(2)).unwrap();
    assert_eq!(null_row.flag_count, 0);
    assert!(null_row.votes.iter().all(|v| v.score.is_none()));
    assert!(result.anomalies().contains(&RowId(7)));
}

#[tokio::test]
async fn test_caller_managed_detection() {
    let columns = scenario_dataset().select(&["x"]).unwrap();
    let token = CancellationToken::new();

    let verdicts = vec![
        ZScoreDetector::new(2.0).unwrap().detect(&columns, &token).unwrap(),
        IqrDetector::default().detect(&columns, &token).unwrap(),
    ];
    let combined = EnsembleCombiner::new(2)
        .unwrap()
        .combine_verdicts(verdicts)
        .unwrap();
    assert_eq!(combined.anomalies(), vec![RowId(7)]);

    let skipped = vec![SkippedStrategy {
        voter: "x_lof".to_string(),
        strategy: StrategyKind::LocalOutlierFactor,
        reason: "timed out".to_string(),
    }];
    let only_zscore = vec![(
        "x_zscore".to_string(),
        ZScoreDetector::new(2.0).unwrap().detect(&columns, &token).unwrap(),
    )];
    let err = EnsembleCombiner::new(2)
        .unwrap()
        .combine(only_zscore, skipped)
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_summary_reports_counts() {
    let runner = EnsembleRunner::builder()
        .column("x")
        .strategy(ZScoreDetector::new(2.0).unwrap())
        .strategy(IqrDetector::default())
        .min_agreement(2)
        .build()
        .unwrap();
    let summary = runner.run(&scenario_dataset()).await.unwrap().summary();

    assert_eq!(summary.total_rows, 8);
    assert_eq!(summary.anomaly_count, 1);
    assert!(summary.duration_ms.is_some());
    assert!(summary.to_string().starts_with("1 of 8 rows flagged"));
}
