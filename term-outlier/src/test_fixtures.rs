//! Synthetic datasets for tests and benchmarks.
//!
//! Every generator is seeded, so the same arguments always produce the same
//! data. Anomalies are injected at known positions and returned alongside the
//! data where a test needs them.

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::prelude::SessionContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::Arc;

use crate::column::RowId;
use crate::dataset::Dataset;
use crate::error::Result;

/// Draws `n` samples from a normal distribution.
pub fn normal_values(n: usize, mean: f64, std: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            // Box-Muller; u1 is kept away from zero for the logarithm.
            let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
            let u2: f64 = rng.random();
            mean + std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
        })
        .collect()
}

/// Normal data with large spikes at `spikes` positions.
pub fn normal_with_spikes(n: usize, spikes: &[usize], seed: u64) -> Vec<f64> {
    let mut values = normal_values(n, 100.0, 5.0, seed);
    for &i in spikes {
        if i < values.len() {
            values[i] = 300.0;
        }
    }
    values
}

/// A sinusoidal series with a slow trend, light noise and a spike at `spike`.
pub fn seasonal_series(n: usize, period: usize, spike: Option<usize>, seed: u64) -> Vec<f64> {
    let noise = normal_values(n, 0.0, 0.2, seed);
    (0..n)
        .map(|i| {
            let t = i as f64;
            let mut value = 50.0 + 0.05 * t + 10.0 * (2.0 * PI * t / period as f64).sin() + noise[i];
            if spike == Some(i) {
                value += 25.0;
            }
            value
        })
        .collect()
}

/// Two-dimensional points in three tight clusters plus isolated points.
///
/// Returns the `x` and `y` coordinates and the positions of the isolated points.
pub fn clustered_points(per_cluster: usize, outliers: usize, seed: u64) -> (Vec<f64>, Vec<f64>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let centres = [(0.0, 0.0), (10.0, 10.0), (-10.0, 10.0)];
    let mut xs = Vec::with_capacity(centres.len() * per_cluster + outliers);
    let mut ys = Vec::with_capacity(xs.capacity());

    for &(cx, cy) in &centres {
        for _ in 0..per_cluster {
            xs.push(cx + rng.random_range(-1.0..1.0));
            ys.push(cy + rng.random_range(-1.0..1.0));
        }
    }

    let mut positions = Vec::with_capacity(outliers);
    for k in 0..outliers {
        positions.push(xs.len());
        let angle = 2.0 * PI * k as f64 / outliers.max(1) as f64;
        xs.push(40.0 * angle.cos());
        ys.push(-30.0 + 40.0 * angle.sin());
    }
    (xs, ys, positions)
}

/// A dataset with a `value` column of normal data and spikes.
pub fn spiky_dataset(n: usize, spikes: &[usize], seed: u64) -> Result<Dataset> {
    Dataset::from_columns(vec![(
        "value",
        normal_with_spikes(n, spikes, seed)
            .into_iter()
            .map(Some)
            .collect(),
    )])
}

/// A dataset with `x` and `y` columns from [`clustered_points`].
pub fn clustered_dataset(per_cluster: usize, outliers: usize, seed: u64) -> Result<(Dataset, Vec<RowId>)> {
    let (xs, ys, positions) = clustered_points(per_cluster, outliers, seed);
    let dataset = Dataset::from_columns(vec![
        ("x", xs.into_iter().map(Some).collect()),
        ("y", ys.into_iter().map(Some).collect()),
    ])?;
    let ids = positions.into_iter().map(|p| RowId(p as i64)).collect();
    Ok((dataset, ids))
}

/// Registers a `metrics` table with `id`, `ts`, `cpu` and `memory` columns.
///
/// Rows are stored in reverse time order so loaders must honour `ORDER BY`.
/// `cpu` has a null every 50 rows and a spike at the row with id 42.
pub fn create_metrics_context(rows: usize, seed: u64) -> Result<SessionContext> {
    let cpu = normal_values(rows, 40.0, 3.0, seed);
    let memory = normal_values(rows, 2048.0, 64.0, seed.wrapping_add(1));

    let order: Vec<usize> = (0..rows).rev().collect();
    let ids: Vec<i64> = order.iter().map(|&i| i as i64).collect();
    let ts: Vec<i64> = order.iter().map(|&i| 1_700_000_000 + 60 * i as i64).collect();
    let cpu: Vec<Option<f64>> = order
        .iter()
        .map(|&i| match i {
            42 => Some(99.0),
            i if i % 50 == 49 => None,
            i => Some(cpu[i]),
        })
        .collect();
    let memory: Vec<f64> = order.iter().map(|&i| memory[i]).collect();

    let batch = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("ts", DataType::Int64, false),
            Field::new("cpu", DataType::Float64, true),
            Field::new("memory", DataType::Float64, false),
        ])),
        vec![
            Arc::new(Int64Array::from(ids)) as ArrayRef,
            Arc::new(Int64Array::from(ts)) as ArrayRef,
            Arc::new(Float64Array::from(cpu)) as ArrayRef,
            Arc::new(Float64Array::from(memory)) as ArrayRef,
        ],
    )?;

    let ctx = SessionContext::new();
    ctx.register_batch("metrics", batch)?;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::stats::{mean, sample_std};
    use crate::sources::{DatasetSource, TableSource};

    #[test]
    fn test_normal_values_are_seeded() {
        assert_eq!(normal_values(10, 0.0, 1.0, 5), normal_values(10, 0.0, 1.0, 5));
        let values = normal_values(5000, 10.0, 2.0, 1);
        let m = mean(&values).unwrap();
        assert!((m - 10.0).abs() < 0.2);
        assert!((sample_std(&values, m).unwrap() - 2.0).abs() < 0.2);
    }

    #[test]
    fn test_clustered_points_positions() {
        let (xs, ys, positions) = clustered_points(20, 3, 1);
        assert_eq!(xs.len(), 63);
        assert_eq!(ys.len(), 63);
        assert_eq!(positions, vec![60, 61, 62]);
    }

    #[test]
    fn test_zscore_and_iqr_agree_on_extremes() {
        use crate::column::NumericColumn;
        use crate::detectors::{CancellationToken, IqrDetector, OutlierDetector, ZScoreDetector};

        let mut values = normal_with_spikes(500, &[100], 21);
        values[300] = -100.0;
        let column = [NumericColumn::from_values("v", values.clone())];
        let token = CancellationToken::new();
        let z = ZScoreDetector::default().detect(&column, &token).unwrap();
        let iqr = IqrDetector::default().detect(&column, &token).unwrap();

        let both: Vec<usize> = (0..values.len())
            .filter(|&i| z.rows()[i].is_anomaly && iqr.rows()[i].is_anomaly)
            .collect();
        assert_eq!(both, vec![100, 300]);

        let m = mean(&values).unwrap();
        let (_, upper) = iqr.expected_range().unwrap();
        for i in both {
            assert_eq!(values[i] > m, values[i] > upper);
        }
    }

    #[tokio::test]
    async fn test_metrics_context_loads_in_time_order() {
        let ctx = create_metrics_context(100, 3).unwrap();
        let dataset = TableSource::new("metrics")
            .id_column("id")
            .order_by("ts")
            .columns(["cpu", "memory"])
            .load(&ctx)
            .await
            .unwrap();

        assert_eq!(dataset.num_rows(), 100);
        assert_eq!(dataset.row_ids()[0], RowId(0));
        assert_eq!(dataset.column("cpu").unwrap().null_count(), 2);
        assert_eq!(dataset.column("cpu").unwrap().get(42), Some(99.0));
    }
}
