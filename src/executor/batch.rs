use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::configuration::Configuration;
use crate::cursor::RowCursor;
use crate::error::{BatchExecutorFailure, SqlBatcherError};
use crate::mapping::{MappedStatement, ParamObject, StatementId};
use crate::results::RowMapper;
use crate::store::{
    BatchExecution, BatchExecutionError, ExecutionHandle, Transaction,
    apply_transaction_timeout, resolve_timeout,
};
use crate::types::UpdateOutcome;

use super::handler::StatementHandler;
use super::result::BatchResult;
use super::state::{BatchGroup, BatchState};

/// Executor that defers updates into batches and flushes them on demand.
///
/// Consecutive updates with identical rendered SQL and statement identity share one prepared
/// handle; switching to another statement opens a new group, and coming back later opens yet
/// another (groups are never merged across a switch). Queries flush every pending group first.
///
/// One executor serves one transaction and must not be shared between tasks; every operation
/// takes `&mut self`.
pub struct BatchExecutor<T: Transaction> {
    configuration: Arc<Configuration>,
    transaction: T,
    state: BatchState,
    closed: bool,
}

impl<T: Transaction> BatchExecutor<T> {
    #[must_use]
    pub fn new(configuration: Arc<Configuration>, transaction: T) -> Self {
        Self {
            configuration,
            transaction,
            state: BatchState::new(),
            closed: false,
        }
    }

    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    #[must_use]
    pub fn transaction(&self) -> &T {
        &self.transaction
    }

    /// Groups waiting for a flush.
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        self.state.group_count()
    }

    /// Parameter sets waiting for a flush, across all groups.
    #[must_use]
    pub fn pending_statements(&self) -> usize {
        self.state.statement_count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue an update.
    ///
    /// Returns [`UpdateOutcome::Deferred`]; the count is reported by the next flush. Statements
    /// whose keys are fetched before execution cannot be batched: they flush pending groups and
    /// run immediately, returning [`UpdateOutcome::Executed`].
    ///
    /// # Errors
    /// Unknown ids, rendering errors, store errors while preparing, and
    /// `SqlBatcherError::ExecutorClosed` after `close`.
    pub async fn submit_update(
        &mut self,
        id: &StatementId,
        parameter: &ParamObject,
    ) -> Result<UpdateOutcome, SqlBatcherError> {
        self.ensure_open()?;
        let statement = self.configuration.statement(id)?;
        if !statement.key_generator().supports_batching() {
            return self.execute_unbatched(statement, parameter).await;
        }

        let bound = self.configuration.render(&statement, parameter)?;
        let mut handler = StatementHandler::new(&self.configuration, Arc::clone(&statement), bound);
        let transaction_timeout = self.transaction.timeout();

        if let Some(group) = self
            .state
            .current_mut(handler.bound_statement().sql(), id)
        {
            let handle = group.handle_mut()?;
            apply_transaction_timeout(handle, handler.statement_timeout(), transaction_timeout);
            handler.bind_parameters(handle)?;
            handler.add_to_batch(handle)?;
            group.push(parameter.clone());
            debug!(statement = %id, params = group.len(), "appended to open batch group");
        } else {
            let connection = self.transaction.connection().await?;
            let mut handle = handler.prepare(connection, transaction_timeout).await?;
            handler.bind_parameters(handle.as_mut())?;
            handler.add_to_batch(handle.as_mut())?;
            let sql = handler.bound_statement().sql().to_owned();
            self.state
                .open_group(BatchGroup::new(statement, sql, handle, parameter.clone()));
            debug!(
                statement = %id,
                groups = self.state.group_count(),
                "opened batch group"
            );
        }
        Ok(UpdateOutcome::Deferred)
    }

    /// Flush pending groups, then run a query and map every row.
    ///
    /// The query's handle is released whatever the outcome.
    ///
    /// # Errors
    /// Flush failures (the query does not run), store errors and mapper errors.
    pub async fn submit_query<R, M>(
        &mut self,
        id: &StatementId,
        parameter: &ParamObject,
        mut mapper: M,
    ) -> Result<Vec<R>, SqlBatcherError>
    where
        R: Send,
        M: RowMapper<R>,
    {
        self.ensure_open()?;
        let statement = self.configuration.statement(id)?;
        self.implicit_flush(id).await?;

        let bound = self.configuration.render(&statement, parameter)?;
        let mut handler = StatementHandler::new(&self.configuration, statement, bound);
        let transaction_timeout = self.transaction.timeout();
        let connection = self.transaction.connection().await?;
        let mut handle = handler.prepare(connection, transaction_timeout).await?;
        let rows = async {
            handler.bind_parameters(handle.as_mut())?;
            handler.execute_query(handle.as_mut(), &mut mapper).await
        }
        .await;
        release_after(handle, rows).await
    }

    /// Flush pending groups, then open a lazy cursor over the query's rows.
    ///
    /// The cursor keeps the executor borrowed until it is dropped; its handle is released once
    /// the rows are exhausted or the cursor goes away.
    ///
    /// # Errors
    /// Flush failures and store errors raised while starting the query.
    pub async fn submit_streaming_query(
        &mut self,
        id: &StatementId,
        parameter: &ParamObject,
    ) -> Result<RowCursor<'_>, SqlBatcherError> {
        self.ensure_open()?;
        let statement = self.configuration.statement(id)?;
        self.implicit_flush(id).await?;

        let bound = self.configuration.render(&statement, parameter)?;
        let mut handler = StatementHandler::new(&self.configuration, statement, bound);
        let transaction_timeout = self.transaction.timeout();
        let connection = self.transaction.connection().await?;
        let mut handle = handler.prepare(connection, transaction_timeout).await?;
        handler.bind_parameters(handle.as_mut())?;
        let cursor = handler.execute_streaming_query(handle.as_mut()).await?;
        Ok(cursor.scoped())
    }

    /// Execute (or, with `is_rollback`, discard) every pending group.
    ///
    /// Groups run in open order, each one's handle released as soon as it has executed. Batching
    /// state is reset on every path. On a store failure the error carries the results of the
    /// groups that completed and the partial result of the failing one; later groups never run.
    ///
    /// # Errors
    /// `SqlBatcherError::BatchFailure` for store failures, `SqlBatcherError::KeyReconciliation`
    /// when the writes succeeded but keys could not be copied back.
    pub async fn flush(&mut self, is_rollback: bool) -> Result<Vec<BatchResult>, SqlBatcherError> {
        self.ensure_open()?;
        self.flush_groups(is_rollback).await
    }

    /// Flush, then commit the store transaction when `required`.
    ///
    /// # Errors
    /// Flush failures (nothing is committed) and commit errors.
    pub async fn commit(&mut self, required: bool) -> Result<Vec<BatchResult>, SqlBatcherError> {
        self.ensure_open()?;
        let results = self.flush_groups(false).await?;
        if required {
            self.transaction.commit().await?;
        }
        Ok(results)
    }

    /// Discard pending groups, then roll back the store transaction when `required`.
    ///
    /// # Errors
    /// Rollback errors.
    pub async fn rollback(&mut self, required: bool) -> Result<(), SqlBatcherError> {
        self.ensure_open()?;
        self.flush_groups(true).await?;
        if required {
            self.transaction.rollback().await?;
        }
        Ok(())
    }

    /// Discard pending groups and close the transaction. Pending updates never reach the store.
    ///
    /// The executor is closed afterwards even if a step fails; later calls return
    /// `SqlBatcherError::ExecutorClosed`. Closing twice is a no-op.
    ///
    /// # Errors
    /// The first error among rollback and transaction close.
    pub async fn close(&mut self, force_rollback: bool) -> Result<(), SqlBatcherError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let discarded = self.flush_groups(true).await;
        let rolled_back = if force_rollback {
            self.transaction.rollback().await
        } else {
            Ok(())
        };
        let closed = self.transaction.close().await;
        first_error([discarded.map(|_| ()), rolled_back, closed])
    }

    fn ensure_open(&self) -> Result<(), SqlBatcherError> {
        if self.closed {
            return Err(SqlBatcherError::ExecutorClosed);
        }
        Ok(())
    }

    async fn implicit_flush(&mut self, id: &StatementId) -> Result<(), SqlBatcherError> {
        if self.state.is_empty() {
            return Ok(());
        }
        let results = self.flush_groups(false).await?;
        debug!(statement = %id, groups = results.len(), "flushed pending batches before query");
        Ok(())
    }

    /// One-at-a-time path for statements whose keys are fetched before execution.
    async fn execute_unbatched(
        &mut self,
        statement: Arc<MappedStatement>,
        parameter: &ParamObject,
    ) -> Result<UpdateOutcome, SqlBatcherError> {
        if !self.state.is_empty() {
            let results = self.flush_groups(false).await?;
            debug!(
                statement = %statement.id(),
                groups = results.len(),
                "flushed pending batches before unbatched statement"
            );
        }
        let configuration = Arc::clone(&self.configuration);
        let transaction_timeout = self.transaction.timeout();
        let key_timeout = resolve_timeout(
            statement
                .timeout()
                .or(configuration.default_statement_timeout()),
            transaction_timeout,
        );
        let connection = self.transaction.connection().await?;
        statement
            .key_generator()
            .process_before(
                configuration.renderer(),
                &statement,
                connection,
                key_timeout,
                parameter,
            )
            .await?;

        // Rendered after the key is in place so the statement can bind it.
        let bound = configuration.render(&statement, parameter)?;
        let mut handler = StatementHandler::new(&configuration, Arc::clone(&statement), bound);
        let mut handle = handler.prepare(connection, transaction_timeout).await?;
        let affected = async {
            handler.bind_parameters(handle.as_mut())?;
            handler.execute_update(handle.as_mut()).await
        }
        .await;
        let affected = release_after(handle, affected).await?;
        debug!(statement = %statement.id(), affected, "executed unbatched statement");
        Ok(UpdateOutcome::Executed(affected))
    }

    async fn flush_groups(
        &mut self,
        is_rollback: bool,
    ) -> Result<Vec<BatchResult>, SqlBatcherError> {
        let groups = self.state.take_all();
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        if is_rollback {
            let statements: usize = groups.iter().map(BatchGroup::len).sum();
            warn!(
                groups = groups.len(),
                statements, "discarding pending batch groups"
            );
            for failure in release_all(groups).await {
                warn!(error = %failure, "failed to release discarded batch handle");
            }
            return Ok(Vec::new());
        }

        debug!(groups = groups.len(), "flushing batch groups");
        let mut results = Vec::with_capacity(groups.len());
        let mut pending = groups.into_iter();
        let mut batch_index = 0;
        while let Some(mut group) = pending.next() {
            batch_index += 1;
            let statement = Arc::clone(group.statement());
            let statement_timeout = statement
                .timeout()
                .or(self.configuration.default_statement_timeout());
            let transaction_timeout = self.transaction.timeout();
            let outcome = match group.handle_mut() {
                Ok(handle) => {
                    apply_transaction_timeout(handle, statement_timeout, transaction_timeout);
                    handle
                        .execute_batch(statement.key_generator().key_capture())
                        .await
                }
                Err(e) => Err(BatchExecutionError::new(BatchExecution::default(), e)),
            };

            let execution = match outcome {
                Ok(execution) => execution,
                Err(err) => {
                    let partial = group.to_result(err.counts);
                    warn!(
                        statement = %statement.id(),
                        batch_index,
                        completed = partial.update_counts().len(),
                        error = %err.cause,
                        "batch group failed"
                    );
                    let mut failure =
                        BatchExecutorFailure::new(batch_index, results, partial, err.cause);
                    failure.add_release_failures(release_remaining(group, pending).await);
                    return Err(failure.into());
                }
            };

            let result = group.to_result(execution.counts);
            if let Err(key_failure) = statement.key_generator().process_batch(
                statement.id(),
                group.parameters(),
                &execution.generated,
            ) {
                warn!(
                    statement = %statement.id(),
                    batch_index,
                    reason = key_failure.reason(),
                    "generated key reconciliation failed"
                );
                let mut failure = key_failure.in_batch(batch_index, results, result);
                failure.add_release_failures(release_remaining(group, pending).await);
                return Err(failure.into());
            }
            if let Err(e) = group.release().await {
                warn!(statement = %statement.id(), error = %e, "failed to release batch handle");
            }
            debug!(
                statement = %statement.id(),
                batch_index,
                params = result.parameter_objects().len(),
                "batch group executed"
            );
            results.push(result);
        }
        Ok(results)
    }
}

impl<T: Transaction> fmt::Debug for BatchExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("state", &self.state)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Close a one-off handle after use; a release failure never replaces the primary outcome.
async fn release_after<R>(
    mut handle: Box<dyn ExecutionHandle>,
    result: Result<R, SqlBatcherError>,
) -> Result<R, SqlBatcherError> {
    if let Err(e) = handle.close().await {
        warn!(sql = handle.sql(), error = %e, "failed to release statement handle");
    }
    result
}

async fn release_all(groups: Vec<BatchGroup>) -> Vec<SqlBatcherError> {
    let mut failures = Vec::new();
    for mut group in groups {
        if let Err(e) = group.release().await {
            warn!(statement = %group.statement_id(), error = %e, "failed to release batch handle");
            failures.push(e);
        }
    }
    failures
}

async fn release_remaining(
    failed: BatchGroup,
    pending: impl Iterator<Item = BatchGroup>,
) -> Vec<SqlBatcherError> {
    let mut groups = vec![failed];
    groups.extend(pending);
    release_all(groups).await
}

fn first_error<const N: usize>(
    results: [Result<(), SqlBatcherError>; N],
) -> Result<(), SqlBatcherError> {
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            if first.is_none() {
                first = Some(e);
            } else {
                warn!(error = %e, "additional error while closing executor");
            }
        }
    }
    first.map_or(Ok(()), Err)
}
