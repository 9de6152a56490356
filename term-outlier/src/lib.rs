//! # Term Outlier - Multi-strategy anomaly detection for Rust
//!
//! Term Outlier flags unusual rows in numeric tables. It runs several
//! independent detection strategies over the same data and combines their
//! per-row votes, so a row is reported only when enough strategies agree.
//! Data is loaded through DataFusion and results are returned as Arrow
//! record batches.
//!
//! ## Quick Start
//!
//! ```rust
//! use term_outlier::prelude::*;
//!
//! # async fn example() -> term_outlier::error::Result<()> {
//! let dataset = Dataset::from_columns(vec![(
//!     "latency_ms",
//!     vec![12.0, 11.5, 12.3, 11.9, 12.1, 250.0, 12.0, 11.8]
//!         .into_iter()
//!         .map(Some)
//!         .collect(),
//! )])?;
//!
//! let runner = EnsembleRunner::builder()
//!     .column("latency_ms")
//!     .strategy(ZScoreDetector::new(2.0)?)
//!     .strategy(IqrDetector::default())
//!     .strategy(ModifiedZScoreDetector::default())
//!     .min_agreement(2)
//!     .build()?;
//!
//! let result = runner.run(&dataset).await?;
//! assert_eq!(result.anomalies(), vec![RowId(5)]);
//! println!("{}", result.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Strategies
//!
//! | Strategy | Shape | Score |
//! |----------|-------|-------|
//! | [`ZScoreDetector`](detectors::ZScoreDetector) | per column | `|x - mean| / std` |
//! | [`IqrDetector`](detectors::IqrDetector) | per column | flags only |
//! | [`ModifiedZScoreDetector`](detectors::ModifiedZScoreDetector) | per column | `0.6745 (x - median) / MAD` |
//! | [`RollingDetector`](detectors::RollingDetector) | per column, ordered | deviation from the centred window |
//! | [`SeasonalDetector`](detectors::SeasonalDetector) | per column, ordered | z-score of the STL residual |
//! | [`LofDetector`](detectors::LofDetector) | all columns | local outlier factor |
//! | [`IsolationForestDetector`](detectors::IsolationForestDetector) | all columns | isolation score |
//!
//! ## Loading data
//!
//! ```rust,no_run
//! use datafusion::prelude::*;
//! use term_outlier::prelude::*;
//!
//! # async fn example() -> term_outlier::error::Result<()> {
//! let ctx = SessionContext::new();
//! ctx.register_csv("metrics", "metrics.csv", CsvReadOptions::new()).await?;
//!
//! let dataset = TableSource::new("metrics")
//!     .id_column("id")
//!     .order_by("ts")
//!     .columns(["cpu", "memory"])
//!     .load(&ctx)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`column`** and **`dataset`**: row-identified numeric columns
//! - **`sources`**: loading datasets from DataFusion tables
//! - **`detectors`**: the individual strategies and their per-row verdicts
//! - **`ensemble`**: concurrent execution and vote combination
//! - **`logging`**: tracing configuration
//! - **`security`**: identifier escaping and parameter validation

pub mod column;
pub mod dataset;
pub mod detectors;
pub mod ensemble;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod security;
pub mod sources;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
