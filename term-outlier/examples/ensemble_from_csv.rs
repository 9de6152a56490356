//! Example running an ensemble over a CSV file.
//!
//! Usage: `cargo run --example ensemble_from_csv -- path/to/file.csv column [column...]`
//!
//! The file needs an `id` column. Rows are scored with the default ensemble
//! (z-score, IQR and isolation forest, two votes required) and the flagged
//! rows are printed as a table.

use datafusion::prelude::*;
use term_outlier::logging::setup::{init_logging, LoggingConfig};
use term_outlier::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::development())?;

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("missing CSV path")?;
    let columns: Vec<String> = args.collect();
    if columns.is_empty() {
        return Err("at least one column is required".into());
    }

    let ctx = SessionContext::new();
    ctx.register_csv("input", &path, CsvReadOptions::new()).await?;

    let dataset = TableSource::new("input")
        .id_column("id")
        .order_by("id")
        .columns(columns.iter().map(String::as_str))
        .load(&ctx)
        .await?;

    let runner = EnsembleRunner::from_config(EnsembleConfig::for_columns(columns))?;
    let result = runner.run(&dataset).await?;
    println!("{}", result.summary());

    ctx.register_batch("anomalies", result.to_record_batch()?)?;
    ctx.sql("SELECT * FROM anomalies WHERE is_anomaly ORDER BY agreement DESC")
        .await?
        .show()
        .await?;

    Ok(())
}
