//! Loading datasets from DataFusion.
//!
//! Callers register their data (CSV, Parquet, in-memory batches, ...) with a
//! `SessionContext`, then describe which columns to score with a
//! [`TableSource`]:
//!
//! ```rust,no_run
//! use datafusion::prelude::*;
//! use term_outlier::sources::{DatasetSource, TableSource};
//!
//! # async fn example() -> term_outlier::error::Result<()> {
//! let ctx = SessionContext::new();
//! ctx.register_csv("events", "events.csv", CsvReadOptions::new()).await?;
//!
//! let dataset = TableSource::new("events")
//!     .id_column("event_id")
//!     .order_by("event_time")
//!     .columns(["amount", "latency_ms"])
//!     .load(&ctx)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use datafusion::prelude::SessionContext;
use tracing::instrument;

use crate::dataset::Dataset;
use crate::error::{OutlierError, Result};
use crate::logging::{truncate_field, LogConfig};
use crate::security::SqlSecurity;

/// Something that can produce a [`Dataset`] from a DataFusion context.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Loads the dataset.
    async fn load(&self, ctx: &SessionContext) -> Result<Dataset>;

    /// Returns a short description used in logs.
    fn description(&self) -> String;
}

/// Loads selected numeric columns from a registered table.
#[derive(Debug, Clone)]
pub struct TableSource {
    table: String,
    id_column: Option<String>,
    order_by: Option<String>,
    columns: Vec<String>,
    log_config: LogConfig,
}

impl TableSource {
    /// Creates a source for the named table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: None,
            order_by: None,
            columns: Vec::new(),
            log_config: LogConfig::default(),
        }
    }

    /// Uses an integer column as row identity instead of row position.
    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    /// Orders rows by the given column, typically a timestamp.
    ///
    /// Windowed and seasonal detectors read rows in order, so time-series
    /// tables should always set this.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    /// Selects the value columns to load.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the logging configuration.
    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log_config = config;
        self
    }

    /// Builds the SQL used to read the table.
    pub fn to_sql(&self) -> Result<String> {
        if self.columns.is_empty() {
            return Err(OutlierError::configuration(
                "At least one value column must be selected",
            ));
        }

        let mut projection = Vec::with_capacity(self.columns.len() + 1);
        if let Some(id) = &self.id_column {
            projection.push(SqlSecurity::escape_identifier(id)?);
        }
        for column in &self.columns {
            projection.push(SqlSecurity::escape_identifier(column)?);
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            projection.join(", "),
            SqlSecurity::escape_identifier(&self.table)?
        );
        if let Some(order) = &self.order_by {
            sql.push_str(&format!(
                " ORDER BY {} ASC",
                SqlSecurity::escape_identifier(order)?
            ));
        }
        Ok(sql)
    }
}

#[async_trait]
impl DatasetSource for TableSource {
    #[instrument(skip(self, ctx), fields(table = %self.table, columns = self.columns.len()))]
    async fn load(&self, ctx: &SessionContext) -> Result<Dataset> {
        let sql = self.to_sql()?;
        crate::log_data_op!(
            self.log_config,
            sql = %truncate_field(&sql, self.log_config.max_field_length),
            "Loading dataset"
        );

        let batches = ctx.sql(&sql).await?.collect().await?;
        let columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let dataset = Dataset::from_record_batches(&batches, self.id_column.as_deref(), &columns)?;

        crate::log_data_op!(
            self.log_config,
            rows = dataset.num_rows(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    fn description(&self) -> String {
        format!("table '{}' ({})", self.table, self.columns.join(", "))
    }
}
