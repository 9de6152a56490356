//! Tabular datasets made of numeric columns that share one row-id universe.

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::compute::{cast, concat};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::column::{ensure_unique, NumericColumn, RowId};
use crate::error::{OutlierError, Result};

/// A set of named numeric columns aligned on the same row ids.
///
/// The dataset owns the row-id universe: every column added to it must cover
/// exactly the same ids in the same order, which is the invariant the
/// ensemble combiner relies on when joining verdicts.
///
/// # Example
///
/// ```rust
/// use term_outlier::dataset::Dataset;
///
/// let dataset = Dataset::from_columns(vec![
///     ("amount", vec![Some(10.0), Some(12.0), None]),
///     ("latency", vec![Some(0.2), Some(0.3), Some(9.5)]),
/// ])
/// .unwrap();
///
/// assert_eq!(dataset.num_rows(), 3);
/// assert_eq!(dataset.column("amount").unwrap().null_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Dataset {
    row_ids: Arc<[RowId]>,
    columns: Vec<NumericColumn>,
}

impl Dataset {
    /// Creates an empty dataset over the given row ids.
    pub fn new(row_ids: Vec<RowId>) -> Result<Self> {
        ensure_unique(&row_ids)?;
        Ok(Self {
            row_ids: row_ids.into(),
            columns: Vec::new(),
        })
    }

    /// Creates a dataset with positional row ids from `(name, values)` pairs.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<Option<f64>>)>) -> Result<Self> {
        let num_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut dataset = Self::new((0..num_rows as i64).map(RowId).collect())?;
        for (name, values) in columns {
            dataset.add_values(name, values)?;
        }
        Ok(dataset)
    }

    /// Adds a column of values aligned with the dataset's row ids.
    pub fn add_values(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let name = name.into();
        if values.len() != self.row_ids.len() {
            return Err(OutlierError::configuration(format!(
                "Column '{name}' has {} values but the dataset has {} rows",
                values.len(),
                self.row_ids.len()
            )));
        }
        let column = NumericColumn::from_parts(name, Arc::clone(&self.row_ids), values);
        self.push(column)
    }

    /// Adds an existing column, which must share the dataset's row order.
    pub fn add_column(&mut self, column: NumericColumn) -> Result<()> {
        if column.row_ids() != &*self.row_ids {
            return Err(OutlierError::configuration(format!(
                "Column '{}' is not aligned with the dataset row ids",
                column.name()
            )));
        }
        let column = NumericColumn::from_parts(
            column.name().to_string(),
            Arc::clone(&self.row_ids),
            column.values().to_vec(),
        );
        self.push(column)
    }

    fn push(&mut self, column: NumericColumn) -> Result<()> {
        if self.columns.iter().any(|c| c.name() == column.name()) {
            return Err(OutlierError::configuration(format!(
                "Column '{}' is already present in the dataset",
                column.name()
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Returns the number of rows.
    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }

    /// Returns the row ids in row order.
    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    /// Returns the column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Result<&NumericColumn> {
        self.columns
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| OutlierError::ColumnNotFound {
                column: name.to_string(),
            })
    }

    /// Looks up several columns by name, preserving the requested order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<NumericColumn>> {
        names
            .iter()
            .map(|name| self.column(name.as_ref()).cloned())
            .collect()
    }

    /// Builds a dataset from Arrow record batches.
    ///
    /// Every selected column is cast to `Float64`; the id column, when given,
    /// is cast to `Int64` and must be free of nulls and duplicates. Without an
    /// id column rows are numbered `0..n` in batch order.
    #[instrument(skip(batches), fields(batches = batches.len()))]
    pub fn from_record_batches(
        batches: &[RecordBatch],
        id_column: Option<&str>,
        columns: &[&str],
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(OutlierError::configuration(
                "At least one value column must be selected",
            ));
        }

        let row_ids: Vec<RowId> = match id_column {
            Some(id_name) => {
                let ids = collect_column(batches, id_name, &DataType::Int64)?;
                let ids = ids
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| OutlierError::TypeMismatch {
                        expected: "Int64".to_string(),
                        found: ids.data_type().to_string(),
                    })?;
                if ids.null_count() > 0 {
                    return Err(OutlierError::configuration(format!(
                        "Id column '{id_name}' contains {} null values",
                        ids.null_count()
                    )));
                }
                ids.values().iter().map(|&v| RowId(v)).collect()
            }
            None => {
                let total: usize = batches.iter().map(|b| b.num_rows()).sum();
                (0..total as i64).map(RowId).collect()
            }
        };

        let mut dataset = Self::new(row_ids)?;
        for name in columns {
            let array = collect_column(batches, name, &DataType::Float64)?;
            let values = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| OutlierError::TypeMismatch {
                    expected: "Float64".to_string(),
                    found: array.data_type().to_string(),
                })?;
            dataset.add_values(*name, values.iter().collect())?;
        }

        debug!(
            rows = dataset.num_rows(),
            columns = dataset.columns.len(),
            "Built dataset from record batches"
        );
        Ok(dataset)
    }
}

/// Concatenates one column across batches and casts it to `target`.
fn collect_column(batches: &[RecordBatch], name: &str, target: &DataType) -> Result<ArrayRef> {
    let mut parts: Vec<ArrayRef> = Vec::with_capacity(batches.len());
    for batch in batches {
        let index = batch
            .schema()
            .index_of(name)
            .map_err(|_| OutlierError::ColumnNotFound {
                column: name.to_string(),
            })?;
        let array = batch.column(index);
        if !is_numeric(array.data_type()) {
            return Err(OutlierError::TypeMismatch {
                expected: "numeric".to_string(),
                found: array.data_type().to_string(),
            });
        }
        parts.push(cast(array, target)?);
    }

    if parts.is_empty() {
        return Ok(arrow::array::new_empty_array(target));
    }
    let refs: Vec<&dyn Array> = parts.iter().map(|a| a.as_ref()).collect();
    Ok(concat(&refs)?)
}

fn is_numeric(data_type: &DataType) -> bool {
    data_type.is_numeric() || matches!(data_type, DataType::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float32Array, Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};

    fn sample_batch() -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int32, false),
                Field::new("amount", DataType::Float32, true),
                Field::new("count", DataType::Int64, true),
                Field::new("label", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(Int32Array::from(vec![10, 20, 30])) as ArrayRef,
                Arc::new(Float32Array::from(vec![Some(1.5), None, Some(3.0)])) as ArrayRef,
                Arc::new(Int64Array::from(vec![Some(4), Some(5), None])) as ArrayRef,
                Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_record_batches_with_id_column() {
        let dataset =
            Dataset::from_record_batches(&[sample_batch()], Some("id"), &["amount", "count"])
                .unwrap();

        assert_eq!(dataset.row_ids(), &[RowId(10), RowId(20), RowId(30)]);
        assert_eq!(
            dataset.column("amount").unwrap().values(),
            &[Some(1.5), None, Some(3.0)]
        );
        assert_eq!(
            dataset.column("count").unwrap().values(),
            &[Some(4.0), Some(5.0), None]
        );
    }

    #[test]
    fn test_positional_ids_across_batches() {
        let batch = sample_batch();
        let dataset =
            Dataset::from_record_batches(&[batch.clone(), batch], None, &["amount"]).unwrap();
        assert_eq!(dataset.num_rows(), 6);
        assert_eq!(dataset.row_ids()[5], RowId(5));
    }

    #[test]
    fn test_duplicate_ids_across_batches_rejected() {
        let batch = sample_batch();
        let err = Dataset::from_record_batches(&[batch.clone(), batch], Some("id"), &["amount"])
            .unwrap_err();
        assert!(matches!(err, OutlierError::DuplicateRowId { row_id: 10 }));
    }

    #[test]
    fn test_non_numeric_column_rejected() {
        let err =
            Dataset::from_record_batches(&[sample_batch()], None, &["label"]).unwrap_err();
        assert!(matches!(err, OutlierError::TypeMismatch { .. }));
    }

    #[test]
    fn test_missing_column() {
        let err =
            Dataset::from_record_batches(&[sample_batch()], None, &["missing"]).unwrap_err();
        assert!(matches!(err, OutlierError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_columns_share_row_ids() {
        let dataset = Dataset::from_columns(vec![
            ("a", vec![Some(1.0), Some(2.0)]),
            ("b", vec![None, Some(4.0)]),
        ])
        .unwrap();
        let selected = dataset.select(&["b", "a"]).unwrap();
        assert_eq!(selected[0].name(), "b");
        assert!(selected[0].same_row_order(&selected[1]));
    }

    #[test]
    fn test_misaligned_column_rejected() {
        let mut dataset = Dataset::from_columns(vec![("a", vec![Some(1.0), Some(2.0)])]).unwrap();
        assert!(dataset.add_values("b", vec![Some(1.0)]).is_err());
        assert!(dataset.add_values("a", vec![Some(1.0), None]).is_err());

        let other = NumericColumn::new("c", vec![RowId(5), RowId(6)], vec![None, None]).unwrap();
        assert!(dataset.add_column(other).is_err());
    }
}
