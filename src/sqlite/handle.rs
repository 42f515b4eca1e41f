use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::InterruptHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::debug;

use crate::cursor::RowCursor;
use crate::error::SqlBatcherError;
use crate::results::{DbRow, ResultSet};
use crate::store::{
    BatchExecution, BatchExecutionError, ExecutionHandle, HandleLease, KeyCapture,
    StatementOutcome,
};
use crate::types::RowValues;

use super::config::SharedSqliteConnection;
use super::connection::{deadline_from, interrupt_until_done, run_blocking_until};
use super::params::Params;
use super::query::{
    build_result_set, classify, deadline_passed, execute_one, stream_rows, timeout_error,
};

/// Prepared `SQLite` statement held by an executor.
///
/// The compiled statement lives in the connection's statement cache; the handle owns the SQL,
/// the bound values and the pending batch.
pub struct SqliteHandle {
    conn: SharedSqliteConnection,
    sql: String,
    parameter_count: usize,
    timeout: Option<Duration>,
    bound: Option<Params>,
    batch: Vec<Params>,
    lease: Option<HandleLease>,
}

impl SqliteHandle {
    pub(crate) fn new(
        conn: SharedSqliteConnection,
        sql: String,
        parameter_count: usize,
        timeout: Option<Duration>,
        lease: HandleLease,
    ) -> Self {
        Self {
            conn,
            sql,
            parameter_count,
            timeout,
            bound: None,
            batch: Vec::new(),
            lease: Some(lease),
        }
    }

    fn ensure_open(&self) -> Result<(), SqlBatcherError> {
        if self.lease.is_none() {
            return Err(SqlBatcherError::ExecutionError(format!(
                "statement handle for `{}` is closed",
                self.sql
            )));
        }
        Ok(())
    }

    fn take_bound(&mut self) -> Result<Params, SqlBatcherError> {
        self.ensure_open()?;
        self.bound.take().ok_or_else(|| {
            SqlBatcherError::BindingMismatch(format!("no parameters bound for `{}`", self.sql))
        })
    }
}

#[async_trait]
impl ExecutionHandle for SqliteHandle {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn set_parameters(&mut self, values: &[RowValues]) -> Result<(), SqlBatcherError> {
        self.ensure_open()?;
        if values.len() != self.parameter_count {
            return Err(SqlBatcherError::ParameterError(format!(
                "`{}` expects {} parameter(s), got {}",
                self.sql,
                self.parameter_count,
                values.len()
            )));
        }
        self.bound = Some(Params::convert(values));
        Ok(())
    }

    fn add_batch(&mut self) -> Result<(), SqlBatcherError> {
        let params = self.take_bound()?;
        self.batch.push(params);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.batch.len()
    }

    async fn execute_update(
        &mut self,
        capture: KeyCapture,
    ) -> Result<StatementOutcome, SqlBatcherError> {
        let params = self.take_bound()?;
        let deadline = deadline_from(self.timeout);
        let sql = self.sql.clone();
        run_blocking_until(self.conn.clone(), deadline, move |c| {
            if deadline_passed(deadline) {
                return Err(timeout_error(&sql));
            }
            execute_one(c, &sql, params.as_values(), capture)
                .map_err(|e| classify(e, deadline, &sql))
        })
        .await?
    }

    async fn execute_batch(
        &mut self,
        capture: KeyCapture,
    ) -> Result<BatchExecution, BatchExecutionError> {
        if let Err(e) = self.ensure_open() {
            return Err(BatchExecutionError::new(BatchExecution::default(), e));
        }
        let batch = std::mem::take(&mut self.batch);
        if batch.is_empty() {
            return Ok(BatchExecution::default());
        }
        let deadline = deadline_from(self.timeout);
        let sql = self.sql.clone();
        let run = run_blocking_until(self.conn.clone(), deadline, move |c| {
            let mut done = BatchExecution::default();
            for params in &batch {
                if deadline_passed(deadline) {
                    return (done, Some(timeout_error(&sql)));
                }
                match execute_one(c, &sql, params.as_values(), capture) {
                    Ok(outcome) => {
                        done.counts.push(outcome.affected);
                        done.generated.push(outcome.generated);
                    }
                    Err(e) => return (done, Some(classify(e, deadline, &sql))),
                }
            }
            (done, None)
        })
        .await;
        match run {
            Ok((done, None)) => Ok(done),
            Ok((done, Some(cause))) => Err(BatchExecutionError::new(done, cause)),
            Err(cause) => Err(BatchExecutionError::new(BatchExecution::default(), cause)),
        }
    }

    async fn execute_query(&mut self) -> Result<ResultSet, SqlBatcherError> {
        let params = self.take_bound()?;
        let deadline = deadline_from(self.timeout);
        let sql = self.sql.clone();
        run_blocking_until(self.conn.clone(), deadline, move |c| {
            if deadline_passed(deadline) {
                return Err(timeout_error(&sql));
            }
            build_result_set(c, &sql, params.as_values()).map_err(|e| classify(e, deadline, &sql))
        })
        .await?
    }

    async fn open_cursor(
        &mut self,
        fetch_size: usize,
    ) -> Result<RowCursor<'static>, SqlBatcherError> {
        let params = self.take_bound()?;
        let lease = self.lease.take().ok_or_else(|| {
            SqlBatcherError::ExecutionError(format!("statement handle for `{}` is closed", self.sql))
        })?;
        let deadline = deadline_from(self.timeout);
        let sql = self.sql.clone();
        let conn = self.conn.clone();
        let interrupt = conn.lock().await.get_interrupt_handle();
        let (tx, rx) = mpsc::channel(fetch_size.max(1));
        let rows = tx.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            if let Err(e) = stream_rows(&guard, &sql, params.as_values(), deadline, &rows) {
                let _ = rows.blocking_send(Err(e));
            }
        });
        tokio::spawn(watch_cursor(worker, tx, interrupt, deadline));
        Ok(RowCursor::new(rx, lease))
    }

    async fn close(&mut self) -> Result<(), SqlBatcherError> {
        self.bound = None;
        self.batch.clear();
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lease.is_none()
    }
}

/// Interrupt the cursor's query once its deadline passes or the cursor is dropped, so the
/// worker gives the connection back.
async fn watch_cursor(
    mut worker: JoinHandle<()>,
    rows: mpsc::Sender<Result<DbRow, SqlBatcherError>>,
    interrupt: InterruptHandle,
    deadline: Option<Instant>,
) {
    let expired = async {
        match deadline {
            Some(deadline) => sleep_until(tokio::time::Instant::from_std(deadline)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        biased;
        _ = &mut worker => return,
        () = expired => debug!("sqlite cursor deadline elapsed, interrupting"),
        () = rows.closed() => debug!("sqlite cursor dropped, interrupting"),
    }
    drop(rows);
    let _ = interrupt_until_done(&interrupt, &mut worker).await;
}

impl std::fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHandle")
            .field("sql", &self.sql)
            .field("pending", &self.batch.len())
            .field("closed", &self.lease.is_none())
            .finish_non_exhaustive()
    }
}
