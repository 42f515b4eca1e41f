//! The seam between the executor and a concrete store.
//!
//! A [`Transaction`] hands out one [`StoreConnection`] for its scope; the connection prepares
//! [`ExecutionHandle`]s, each of which is one live prepared statement with its own parameter slots
//! and pending-batch buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cursor::RowCursor;
use crate::error::SqlBatcherError;
use crate::mapping::MappedStatement;
use crate::results::{DbRow, ResultSet};
use crate::types::{DatabaseType, RowValues};

/// Whether an execution should read back generated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCapture {
    Skip,
    Collect,
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default)]
pub struct StatementOutcome {
    pub affected: u64,
    /// First generated-key row, when keys were requested and the store produced one.
    pub generated: Option<DbRow>,
}

/// Result of executing a handle's pending batch; one entry per queued parameter set.
#[derive(Debug, Clone, Default)]
pub struct BatchExecution {
    pub counts: Vec<u64>,
    pub generated: Vec<Option<DbRow>>,
}

/// The store rejected a statement partway through a batch.
///
/// `counts` and `generated` only cover the statements confirmed executed before the failure.
#[derive(Debug, Error)]
#[error("batch stopped after {} statement(s): {cause}", counts.len())]
pub struct BatchExecutionError {
    pub counts: Vec<u64>,
    pub generated: Vec<Option<DbRow>>,
    #[source]
    pub cause: SqlBatcherError,
}

impl BatchExecutionError {
    pub(crate) fn new(completed: BatchExecution, cause: SqlBatcherError) -> Self {
        Self {
            counts: completed.counts,
            generated: completed.generated,
            cause,
        }
    }
}

/// Transaction boundary handed to an executor.
#[async_trait]
pub trait Transaction: Send {
    /// The connection for this transaction, acquiring it and opening the store transaction on
    /// first use.
    async fn connection(&mut self) -> Result<&mut dyn StoreConnection, SqlBatcherError>;

    async fn commit(&mut self) -> Result<(), SqlBatcherError>;

    async fn rollback(&mut self) -> Result<(), SqlBatcherError>;

    /// Roll back anything still open and give the connection back.
    async fn close(&mut self) -> Result<(), SqlBatcherError>;

    /// Remaining transaction-wide deadline, if one was configured.
    fn timeout(&self) -> Option<Duration>;
}

/// A connection scoped to one transaction.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Prepare `sql`, applying `timeout` as a hard execution deadline.
    async fn prepare(
        &mut self,
        sql: &str,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn ExecutionHandle>, SqlBatcherError>;
}

/// One live prepared statement.
///
/// Values written by [`ExecutionHandle::set_parameters`] are consumed by the next `add_batch`
/// or execute call; running either without fresh values is a `BindingMismatch`. The handle is
/// released exactly once, by `close` or when it is dropped.
#[async_trait]
pub trait ExecutionHandle: Send + Sync {
    fn sql(&self) -> &str;

    fn timeout(&self) -> Option<Duration>;

    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Write values into the parameter slots.
    fn set_parameters(&mut self, values: &[RowValues]) -> Result<(), SqlBatcherError>;

    /// Queue the bound values as one more unit of the pending batch.
    fn add_batch(&mut self) -> Result<(), SqlBatcherError>;

    /// Number of queued parameter sets.
    fn pending(&self) -> usize;

    async fn execute_update(
        &mut self,
        capture: KeyCapture,
    ) -> Result<StatementOutcome, SqlBatcherError>;

    /// Execute the queued parameter sets in order, clearing the queue.
    async fn execute_batch(
        &mut self,
        capture: KeyCapture,
    ) -> Result<BatchExecution, BatchExecutionError>;

    async fn execute_query(&mut self) -> Result<ResultSet, SqlBatcherError>;

    /// Start streaming rows; the cursor takes over the handle's lease.
    async fn open_cursor(&mut self, fetch_size: usize)
    -> Result<RowCursor<'static>, SqlBatcherError>;

    /// Release the handle. Later calls are no-ops.
    async fn close(&mut self) -> Result<(), SqlBatcherError>;

    fn is_closed(&self) -> bool;
}

/// Counts live execution handles of one backend.
#[derive(Debug, Clone, Default)]
pub struct HandleCounter(Arc<AtomicUsize>);

impl HandleCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles acquired and not yet released.
    #[must_use]
    pub fn open(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire(&self) -> HandleLease {
        self.0.fetch_add(1, Ordering::SeqCst);
        HandleLease {
            counter: Arc::clone(&self.0),
            released: false,
        }
    }
}

/// Proof that a handle is live; released once, explicitly or on drop.
#[derive(Debug)]
pub struct HandleLease {
    counter: Arc<AtomicUsize>,
    released: bool,
}

impl HandleLease {
    pub(crate) fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Effective deadline for a statement given the remaining transaction deadline.
///
/// A zero statement timeout counts as unset. The transaction deadline wins when the statement has
/// none or a longer one.
#[must_use]
pub fn resolve_timeout(
    statement_timeout: Option<Duration>,
    transaction_timeout: Option<Duration>,
) -> Option<Duration> {
    let statement_timeout = statement_timeout.filter(|t| !t.is_zero());
    match (statement_timeout, transaction_timeout) {
        (Some(stmt), Some(tx)) if tx < stmt => Some(tx),
        (None, Some(tx)) => Some(tx),
        (stmt, _) => stmt,
    }
}

/// Re-apply the timeout on a live handle; the transaction deadline may have ticked down since
/// the handle was prepared.
pub fn apply_transaction_timeout(
    handle: &mut dyn ExecutionHandle,
    statement_timeout: Option<Duration>,
    transaction_timeout: Option<Duration>,
) {
    handle.set_timeout(resolve_timeout(statement_timeout, transaction_timeout));
}

/// Fetch size for a streaming cursor over `statement`.
pub(crate) fn fetch_size_for(statement: &MappedStatement, default: usize) -> usize {
    statement.fetch_size().unwrap_or(default).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_deadline_caps_statement_timeout() {
        let s = Duration::from_secs(5);
        let t = Duration::from_secs(2);
        assert_eq!(resolve_timeout(Some(s), Some(t)), Some(t));
        assert_eq!(resolve_timeout(Some(t), Some(s)), Some(t));
        assert_eq!(resolve_timeout(None, Some(t)), Some(t));
        assert_eq!(resolve_timeout(Some(Duration::ZERO), Some(t)), Some(t));
        assert_eq!(resolve_timeout(Some(s), None), Some(s));
        assert_eq!(resolve_timeout(Some(Duration::ZERO), None), None);
        assert_eq!(resolve_timeout(None, None), None);
    }

    #[test]
    fn lease_releases_once() {
        let counter = HandleCounter::new();
        let mut lease = counter.acquire();
        let other = counter.acquire();
        assert_eq!(counter.open(), 2);
        lease.release();
        lease.release();
        assert_eq!(counter.open(), 1);
        drop(lease);
        assert_eq!(counter.open(), 1);
        drop(other);
        assert_eq!(counter.open(), 0);
    }
}
