//! Numeric column views with stable row identities.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{OutlierError, Result};

/// Stable identity of a record.
///
/// Row ids are the join key used to align verdicts from different strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub i64);

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An ordered sequence of nullable `f64` values keyed by row id.
///
/// Row ids are shared behind an `Arc`, so every column of a [`Dataset`]
/// points at the same id slice and cloning a column is cheap.
///
/// NaN and infinite values are stored as null; detectors only see finite values.
///
/// [`Dataset`]: crate::dataset::Dataset
#[derive(Debug, Clone)]
pub struct NumericColumn {
    name: String,
    row_ids: Arc<[RowId]>,
    values: Arc<[Option<f64>]>,
}

impl NumericColumn {
    /// Creates a column from explicit row ids and values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the lengths differ and
    /// [`OutlierError::DuplicateRowId`] when a row id repeats.
    pub fn new(
        name: impl Into<String>,
        row_ids: impl Into<Arc<[RowId]>>,
        values: Vec<Option<f64>>,
    ) -> Result<Self> {
        let name = name.into();
        let row_ids = row_ids.into();
        if row_ids.len() != values.len() {
            return Err(OutlierError::configuration(format!(
                "Column '{name}' has {} values but {} row ids",
                values.len(),
                row_ids.len()
            )));
        }
        ensure_unique(&row_ids)?;
        Ok(Self::from_parts(name, row_ids, values))
    }

    /// Creates a column with positional row ids `0..n` from non-null values.
    pub fn from_values(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::from_options(name, values.into_iter().map(Some).collect())
    }

    /// Creates a column with positional row ids `0..n` from nullable values.
    pub fn from_options(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        let row_ids: Arc<[RowId]> = (0..values.len() as i64).map(RowId).collect();
        Self::from_parts(name.into(), row_ids, values)
    }

    /// Builds a column whose ids are already known to be unique.
    pub(crate) fn from_parts(name: String, row_ids: Arc<[RowId]>, values: Vec<Option<f64>>) -> Self {
        let values: Arc<[Option<f64>]> = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        Self {
            name,
            row_ids,
            values,
        }
    }

    /// Returns the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of rows, nulls included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the row ids in row order.
    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    /// Returns the shared row id slice.
    pub(crate) fn shared_row_ids(&self) -> Arc<[RowId]> {
        Arc::clone(&self.row_ids)
    }

    /// Returns the values in row order.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Returns the value of the row at `index`.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    /// Iterates over `(row_id, value)` pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, Option<f64>)> + '_ {
        self.row_ids.iter().copied().zip(self.values.iter().copied())
    }

    /// Returns the non-null values in row order.
    pub fn non_null_values(&self) -> Vec<f64> {
        self.values.iter().flatten().copied().collect()
    }

    /// Returns the number of null values.
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// Returns true when `other` has exactly the same row ids in the same order.
    pub fn same_row_order(&self, other: &NumericColumn) -> bool {
        Arc::ptr_eq(&self.row_ids, &other.row_ids) || self.row_ids == other.row_ids
    }

    /// Returns true when `other` covers the same set of row ids, in any order.
    pub fn same_universe(&self, other: &NumericColumn) -> bool {
        if self.same_row_order(other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        let mine: HashSet<RowId> = self.row_ids.iter().copied().collect();
        other.row_ids.iter().all(|id| mine.contains(id))
    }
}

/// Verifies that no row id appears twice.
pub(crate) fn ensure_unique(row_ids: &[RowId]) -> Result<()> {
    let mut seen = HashSet::with_capacity(row_ids.len());
    for id in row_ids {
        if !seen.insert(*id) {
            return Err(OutlierError::DuplicateRowId { row_id: id.0 });
        }
    }
    Ok(())
}
