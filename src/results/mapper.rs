use super::row::DbRow;
use crate::error::SqlBatcherError;

/// Result materialization seam: turns one row into a caller value.
///
/// Closures implement it directly:
/// ```rust
/// use sql_batcher::prelude::*;
///
/// let mut names = |row: &DbRow| -> Result<String, SqlBatcherError> {
///     Ok(row.get("name").and_then(RowValues::as_text).unwrap_or_default().to_owned())
/// };
/// # let _ = &mut names;
/// ```
pub trait RowMapper<T>: Send {
    /// Map one row.
    ///
    /// # Errors
    /// Any error aborts materialization and is returned to the caller.
    fn map_row(&mut self, row: &DbRow) -> Result<T, SqlBatcherError>;
}

impl<T, F> RowMapper<T> for F
where
    F: FnMut(&DbRow) -> Result<T, SqlBatcherError> + Send,
{
    fn map_row(&mut self, row: &DbRow) -> Result<T, SqlBatcherError> {
        self(row)
    }
}

/// Mapper that hands rows back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRows;

impl RowMapper<DbRow> for RawRows {
    fn map_row(&mut self, row: &DbRow) -> Result<DbRow, SqlBatcherError> {
        Ok(row.clone())
    }
}
