use std::fmt;
use std::pin::pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_postgres::Statement;

use crate::cursor::RowCursor;
use crate::error::SqlBatcherError;
use crate::results::{DbRow, ResultSet};
use crate::store::{
    BatchExecution, BatchExecutionError, ExecutionHandle, HandleLease, KeyCapture,
    StatementOutcome,
};
use crate::types::RowValues;

use super::connection::{SharedPgClient, timeout_error, with_deadline};
use super::params::as_refs;
use super::query::{build_result_set_from_statement, columns_of, to_db_row};

/// Prepared Postgres statement held by an executor.
pub struct PgHandle {
    client: SharedPgClient,
    statement: Statement,
    sql: String,
    timeout: Option<Duration>,
    bound: Option<Vec<RowValues>>,
    batch: Vec<Vec<RowValues>>,
    lease: Option<HandleLease>,
}

impl PgHandle {
    pub(crate) fn new(
        client: SharedPgClient,
        statement: Statement,
        sql: String,
        timeout: Option<Duration>,
        lease: HandleLease,
    ) -> Self {
        Self {
            client,
            statement,
            sql,
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

    fn take_bound(&mut self) -> Result<Vec<RowValues>, SqlBatcherError> {
        self.ensure_open()?;
        self.bound.take().ok_or_else(|| {
            SqlBatcherError::BindingMismatch(format!("no parameters bound for `{}`", self.sql))
        })
    }

    /// Run one parameter set; `RETURNING` statements report their returned rows.
    async fn run_one(
        &self,
        values: &[RowValues],
        capture: KeyCapture,
        timeout: Option<Duration>,
    ) -> Result<StatementOutcome, SqlBatcherError> {
        let params = as_refs(values);
        if self.statement.columns().is_empty() {
            let affected = with_deadline(
                &self.client,
                timeout,
                &self.sql,
                self.client.execute(&self.statement, &params),
            )
            .await?;
            return Ok(StatementOutcome {
                affected,
                generated: None,
            });
        }
        let rows = with_deadline(
            &self.client,
            timeout,
            &self.sql,
            self.client.query(&self.statement, &params),
        )
        .await?;
        let generated = match (capture, rows.first()) {
            (KeyCapture::Collect, Some(row)) => {
                Some(to_db_row(&columns_of(&self.statement), row)?)
            }
            _ => None,
        };
        Ok(StatementOutcome {
            affected: rows.len() as u64,
            generated,
        })
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

#[async_trait]
impl ExecutionHandle for PgHandle {
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
        let expected = self.statement.params().len();
        if values.len() != expected {
            return Err(SqlBatcherError::ParameterError(format!(
                "`{}` expects {expected} parameter(s), got {}",
                self.sql,
                values.len()
            )));
        }
        self.bound = Some(values.to_vec());
        Ok(())
    }

    fn add_batch(&mut self) -> Result<(), SqlBatcherError> {
        let values = self.take_bound()?;
        self.batch.push(values);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.batch.len()
    }

    async fn execute_update(
        &mut self,
        capture: KeyCapture,
    ) -> Result<StatementOutcome, SqlBatcherError> {
        let values = self.take_bound()?;
        self.run_one(&values, capture, self.timeout).await
    }

    async fn execute_batch(
        &mut self,
        capture: KeyCapture,
    ) -> Result<BatchExecution, BatchExecutionError> {
        if let Err(e) = self.ensure_open() {
            return Err(BatchExecutionError::new(BatchExecution::default(), e));
        }
        let batch = std::mem::take(&mut self.batch);
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut done = BatchExecution::default();
        for values in &batch {
            let timeout = remaining(deadline);
            if timeout.is_some_and(|t| t.is_zero()) {
                return Err(BatchExecutionError::new(done, timeout_error(&self.sql)));
            }
            match self.run_one(values, capture, timeout).await {
                Ok(outcome) => {
                    done.counts.push(outcome.affected);
                    done.generated.push(outcome.generated);
                }
                Err(cause) => return Err(BatchExecutionError::new(done, cause)),
            }
        }
        Ok(done)
    }

    async fn execute_query(&mut self) -> Result<ResultSet, SqlBatcherError> {
        let values = self.take_bound()?;
        let params = as_refs(&values);
        let rows = with_deadline(
            &self.client,
            self.timeout,
            &self.sql,
            self.client.query(&self.statement, &params),
        )
        .await?;
        build_result_set_from_statement(&self.statement, &rows)
    }

    async fn open_cursor(
        &mut self,
        fetch_size: usize,
    ) -> Result<RowCursor<'static>, SqlBatcherError> {
        let values = self.take_bound()?;
        let lease = self.lease.take().ok_or_else(|| {
            SqlBatcherError::ExecutionError(format!("statement handle for `{}` is closed", self.sql))
        })?;
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let client = SharedPgClient::clone(&self.client);
        let statement = self.statement.clone();
        let sql = self.sql.clone();
        let (tx, rx) = mpsc::channel(fetch_size.max(1));
        tokio::spawn(async move {
            let produced = async {
                let columns = columns_of(&statement);
                let stream = with_deadline(
                    &client,
                    remaining(deadline),
                    &sql,
                    client.query_raw(&statement, values.iter()),
                )
                .await?;
                let mut stream = pin!(stream);
                while let Some(row) = with_deadline(
                    &client,
                    remaining(deadline),
                    &sql,
                    async { stream.next().await.transpose() },
                )
                .await?
                {
                    let row: DbRow = to_db_row(&columns, &row)?;
                    if tx.send(Ok(row)).await.is_err() {
                        // Cursor dropped early.
                        return Ok(());
                    }
                }
                Ok::<(), SqlBatcherError>(())
            }
            .await;
            if let Err(e) = produced {
                let _ = tx.send(Err(e)).await;
            }
        });
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

impl fmt::Debug for PgHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgHandle")
            .field("sql", &self.sql)
            .field("pending", &self.batch.len())
            .field("closed", &self.lease.is_none())
            .finish_non_exhaustive()
    }
}
