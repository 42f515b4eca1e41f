//! In-memory store used by the executor's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::cursor::RowCursor;
use crate::error::SqlBatcherError;
use crate::mapping::{MappedStatement, SqlCommandType, StatementId};
use crate::results::{DbRow, ResultSet};
use crate::store::{
    BatchExecution, BatchExecutionError, ExecutionHandle, KeyCapture, StatementOutcome,
    StoreConnection, Transaction,
};
use crate::types::{DatabaseType, RowValues};

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<String>,
    open: usize,
    closes: usize,
    next_key: i64,
    fail_batch_at: HashMap<String, usize>,
    fail_close: HashSet<String>,
    timeouts: Vec<Option<Duration>>,
}

/// Shared record of everything the stub store was asked to do.
#[derive(Debug, Clone, Default)]
pub(crate) struct StubLog {
    inner: Arc<Mutex<LogInner>>,
}

impl StubLog {
    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap()
    }

    fn record(&self, event: String) {
        self.lock().events.push(event);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub(crate) fn open(&self) -> usize {
        self.lock().open
    }

    pub(crate) fn closes(&self) -> usize {
        self.lock().closes
    }

    pub(crate) fn timeouts(&self) -> Vec<Option<Duration>> {
        self.lock().timeouts.clone()
    }

    /// Make the statement at `position` (0-based) of every batch for `sql` fail.
    pub(crate) fn fail_batch_at(&self, sql: &str, position: usize) {
        self.lock().fail_batch_at.insert(sql.to_string(), position);
    }

    pub(crate) fn fail_close(&self, sql: &str) {
        self.lock().fail_close.insert(sql.to_string());
    }

    fn next_key(&self) -> DbRow {
        let mut inner = self.lock();
        inner.next_key += 1;
        DbRow::single("id", RowValues::Int(inner.next_key))
    }
}

pub(crate) fn statement(id: &str, sql: &str) -> Arc<MappedStatement> {
    Arc::new(
        MappedStatement::builder(
            StatementId::parse(id).unwrap(),
            SqlCommandType::Insert,
            sql,
        )
        .finish(),
    )
}

pub(crate) struct StubHandle {
    log: StubLog,
    sql: String,
    timeout: Option<Duration>,
    bound: Option<Vec<RowValues>>,
    batch: Vec<Vec<RowValues>>,
    closed: bool,
}

impl StubHandle {
    pub(crate) fn new(log: &StubLog, sql: &str) -> Self {
        log.lock().open += 1;
        Self {
            log: log.clone(),
            sql: sql.to_string(),
            timeout: None,
            bound: None,
            batch: Vec::new(),
            closed: false,
        }
    }

    fn take_bound(&mut self) -> Result<Vec<RowValues>, SqlBatcherError> {
        self.bound
            .take()
            .ok_or_else(|| SqlBatcherError::BindingMismatch(self.sql.clone()))
    }
}

#[async_trait]
impl ExecutionHandle for StubHandle {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.log.lock().timeouts.push(timeout);
        self.timeout = timeout;
    }

    fn set_parameters(&mut self, values: &[RowValues]) -> Result<(), SqlBatcherError> {
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
        self.take_bound()?;
        self.log.record(format!("update {}", self.sql));
        Ok(StatementOutcome {
            affected: 1,
            generated: (capture == KeyCapture::Collect).then(|| self.log.next_key()),
        })
    }

    async fn execute_batch(
        &mut self,
        capture: KeyCapture,
    ) -> Result<BatchExecution, BatchExecutionError> {
        let batch = std::mem::take(&mut self.batch);
        self.log
            .record(format!("batch {} x{}", self.sql, batch.len()));
        let fail_at = self.log.lock().fail_batch_at.get(&self.sql).copied();
        let mut done = BatchExecution::default();
        for position in 0..batch.len() {
            if fail_at == Some(position) {
                return Err(BatchExecutionError::new(
                    done,
                    SqlBatcherError::ExecutionError(format!("stub failure at #{position}")),
                ));
            }
            done.counts.push(1);
            done.generated
                .push((capture == KeyCapture::Collect).then(|| self.log.next_key()));
        }
        Ok(done)
    }

    async fn execute_query(&mut self) -> Result<ResultSet, SqlBatcherError> {
        self.take_bound()?;
        self.log.record(format!("query {}", self.sql));
        let mut rs = ResultSet::with_capacity(1);
        rs.set_column_names(vec!["n".into()]);
        rs.add_row_values(vec![RowValues::Int(1)]);
        Ok(rs)
    }

    async fn open_cursor(
        &mut self,
        _fetch_size: usize,
    ) -> Result<RowCursor<'static>, SqlBatcherError> {
        Err(SqlBatcherError::Unimplemented("stub cursor".into()))
    }

    async fn close(&mut self) -> Result<(), SqlBatcherError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let fails = {
            let mut inner = self.log.lock();
            inner.open -= 1;
            inner.closes += 1;
            inner.fail_close.contains(&self.sql)
        };
        if fails {
            return Err(SqlBatcherError::ResourceRelease(format!(
                "stub close failure for {}",
                self.sql
            )));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for StubHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.log.lock().open -= 1;
        }
    }
}

pub(crate) struct StubConnection {
    log: StubLog,
}

impl StubConnection {
    pub(crate) fn for_log(log: &StubLog) -> Self {
        Self { log: log.clone() }
    }
}

#[async_trait]
impl StoreConnection for StubConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn prepare(
        &mut self,
        sql: &str,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn ExecutionHandle>, SqlBatcherError> {
        self.log.record(format!("prepare {sql}"));
        let mut handle = StubHandle::new(&self.log, sql);
        handle.timeout = timeout;
        Ok(Box::new(handle))
    }
}

pub(crate) struct StubTransaction {
    connection: StubConnection,
    pub(crate) timeout: Option<Duration>,
}

impl StubTransaction {
    pub(crate) fn new(log: &StubLog) -> Self {
        Self {
            connection: StubConnection::for_log(log),
            timeout: None,
        }
    }
}

#[async_trait]
impl Transaction for StubTransaction {
    async fn connection(&mut self) -> Result<&mut dyn StoreConnection, SqlBatcherError> {
        Ok(&mut self.connection)
    }

    async fn commit(&mut self) -> Result<(), SqlBatcherError> {
        self.connection.log.record("commit".into());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlBatcherError> {
        self.connection.log.record("rollback".into());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlBatcherError> {
        self.connection.log.record("close".into());
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
