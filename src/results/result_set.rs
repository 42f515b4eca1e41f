use std::sync::Arc;

use super::row::{Columns, DbRow};
use crate::types::RowValues;

/// Materialized result of a one-off query.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<DbRow>,
    /// Rows read so far; equals `results.len()` for materialized sets
    pub rows_affected: usize,
    columns: Option<Arc<Columns>>,
}

impl ResultSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            rows_affected: 0,
            columns: None,
        }
    }

    /// Set the column names shared by all rows added afterwards.
    pub fn set_column_names(&mut self, column_names: Vec<String>) {
        self.columns = Some(Arc::new(Columns::new(column_names)));
    }

    #[must_use]
    pub fn columns(&self) -> Option<&Arc<Columns>> {
        self.columns.as_ref()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.as_deref().map_or(&[], Columns::names)
    }

    /// Add a row of values under the current column names.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        let columns = self
            .columns
            .get_or_insert_with(|| Arc::new(Columns::new(Vec::new())))
            .clone();
        self.results.push(DbRow::new(columns, row_values));
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&DbRow> {
        self.results.first()
    }
}

impl IntoIterator for ResultSet {
    type Item = DbRow;
    type IntoIter = std::vec::IntoIter<DbRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
