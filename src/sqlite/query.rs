use std::sync::Arc;
use std::time::Instant;

use rusqlite::types::Value;
use rusqlite::{Connection, Statement, params_from_iter};
use tokio::sync::mpsc;

use crate::error::SqlBatcherError;
use crate::results::{Columns, DbRow, ResultSet};
use crate::store::{KeyCapture, StatementOutcome};
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns `SqlBatcherError` if the value cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, SqlBatcherError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

fn extract_row(row: &rusqlite::Row, column_count: usize) -> Result<Vec<RowValues>, SqlBatcherError> {
    (0..column_count)
        .map(|idx| sqlite_extract_value(row, idx))
        .collect()
}

fn columns_of(stmt: &Statement<'_>) -> Arc<Columns> {
    Arc::new(Columns::new(
        stmt.column_names()
            .iter()
            .map(ToString::to_string)
            .collect(),
    ))
}

pub(crate) fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

pub(crate) fn timeout_error(sql: &str) -> SqlBatcherError {
    SqlBatcherError::Timeout(format!("deadline elapsed while executing `{sql}`"))
}

/// Map a store error raised after the deadline to a timeout.
pub(crate) fn classify(
    err: SqlBatcherError,
    deadline: Option<Instant>,
    sql: &str,
) -> SqlBatcherError {
    if deadline_passed(deadline) {
        timeout_error(sql)
    } else {
        err
    }
}

/// Execute one statement with one parameter set.
///
/// Statements that yield columns (`RETURNING`) report the rows they returned as the affected
/// count and the first row as the generated key; others report `last_insert_rowid()` under the
/// column name `rowid`.
pub(crate) fn execute_one(
    conn: &Connection,
    sql: &str,
    values: &[Value],
    capture: KeyCapture,
) -> Result<StatementOutcome, SqlBatcherError> {
    let mut stmt = conn.prepare_cached(sql)?;
    if stmt.column_count() > 0 {
        let columns = columns_of(&stmt);
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut outcome = StatementOutcome::default();
        while let Some(row) = rows.next()? {
            outcome.affected += 1;
            if capture == KeyCapture::Collect && outcome.generated.is_none() {
                outcome.generated = Some(DbRow::new(
                    Arc::clone(&columns),
                    extract_row(row, columns.len())?,
                ));
            }
        }
        return Ok(outcome);
    }
    let affected = stmt.execute(params_from_iter(values.iter()))?;
    let generated = (capture == KeyCapture::Collect && affected > 0)
        .then(|| DbRow::single("rowid", RowValues::Int(conn.last_insert_rowid())));
    Ok(StatementOutcome {
        affected: affected as u64,
        generated,
    })
}

/// Build a result set from a `SQLite` query.
///
/// # Errors
/// Returns `SqlBatcherError` if preparation, execution, or value extraction fails.
pub fn build_result_set(
    conn: &Connection,
    sql: &str,
    values: &[Value],
) -> Result<ResultSet, SqlBatcherError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns = columns_of(&stmt);
    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(columns.names().to_vec());

    let mut rows = stmt.query(params_from_iter(values.iter()))?;
    while let Some(row) = rows.next()? {
        result_set.add_row_values(extract_row(row, columns.len())?);
    }
    Ok(result_set)
}

/// Push rows into `tx` until the query is exhausted or the receiver goes away.
///
/// Errors raised after `deadline` (an interrupted step included) are reported as timeouts.
pub(crate) fn stream_rows(
    conn: &Connection,
    sql: &str,
    values: &[Value],
    deadline: Option<Instant>,
    tx: &mpsc::Sender<Result<DbRow, SqlBatcherError>>,
) -> Result<(), SqlBatcherError> {
    let fail = |e: rusqlite::Error| classify(SqlBatcherError::SqliteError(e), deadline, sql);
    if deadline_passed(deadline) {
        return Err(timeout_error(sql));
    }
    let mut stmt = conn.prepare_cached(sql).map_err(fail)?;
    let columns = columns_of(&stmt);
    let mut rows = stmt.query(params_from_iter(values.iter())).map_err(fail)?;
    while let Some(row) = rows.next().map_err(fail)? {
        if deadline_passed(deadline) {
            return Err(timeout_error(sql));
        }
        let row = DbRow::new(Arc::clone(&columns), extract_row(row, columns.len())?);
        if tx.blocking_send(Ok(row)).is_err() {
            // Cursor dropped early.
            return Ok(());
        }
    }
    Ok(())
}
