use std::fmt;
use std::sync::Arc;

use crate::error::SqlBatcherError;
use crate::mapping::{MappedStatement, ParamObject, StatementId};
use crate::store::ExecutionHandle;

use super::result::BatchResult;

/// Parameter sets sharing one SQL text and statement identity, queued on one live handle.
pub(crate) struct BatchGroup {
    statement: Arc<MappedStatement>,
    sql: String,
    parameters: Vec<ParamObject>,
    handle: Option<Box<dyn ExecutionHandle>>,
}

impl BatchGroup {
    pub(crate) fn new(
        statement: Arc<MappedStatement>,
        sql: String,
        handle: Box<dyn ExecutionHandle>,
        first: ParamObject,
    ) -> Self {
        Self {
            statement,
            sql,
            parameters: vec![first],
            handle: Some(handle),
        }
    }

    fn accepts(&self, sql: &str, id: &StatementId) -> bool {
        self.handle.is_some() && self.statement.id() == id && self.sql == sql
    }

    pub(crate) fn statement(&self) -> &Arc<MappedStatement> {
        &self.statement
    }

    pub(crate) fn statement_id(&self) -> &StatementId {
        self.statement.id()
    }

    pub(crate) fn parameters(&self) -> &[ParamObject] {
        &self.parameters
    }

    pub(crate) fn len(&self) -> usize {
        self.parameters.len()
    }

    pub(crate) fn push(&mut self, parameter: ParamObject) {
        self.parameters.push(parameter);
    }

    pub(crate) fn handle_mut(&mut self) -> Result<&mut dyn ExecutionHandle, SqlBatcherError> {
        match self.handle.as_mut() {
            Some(handle) => Ok(handle.as_mut()),
            None => Err(SqlBatcherError::ExecutionError(format!(
                "batch group for {} was already released",
                self.statement.id()
            ))),
        }
    }

    /// Close the handle. Safe to call more than once; only the first call reaches the store.
    pub(crate) async fn release(&mut self) -> Result<(), SqlBatcherError> {
        match self.handle.take() {
            Some(mut handle) => handle.close().await,
            None => Ok(()),
        }
    }

    pub(crate) fn to_result(&self, update_counts: Vec<u64>) -> BatchResult {
        BatchResult::new(
            self.statement.id().clone(),
            self.sql.clone(),
            self.parameters.clone(),
            update_counts,
        )
    }
}

impl fmt::Debug for BatchGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGroup")
            .field("statement", self.statement.id())
            .field("sql", &self.sql)
            .field("parameters", &self.parameters.len())
            .field("released", &self.handle.is_none())
            .finish()
    }
}

/// Session-scoped batching state: the outstanding groups in open order.
///
/// Only the most recently opened group accepts appends. Reset on construction and by
/// [`BatchState::take_all`], which every flush path starts with.
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    groups: Vec<BatchGroup>,
}

impl BatchState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub(crate) fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn statement_count(&self) -> usize {
        self.groups.iter().map(BatchGroup::len).sum()
    }

    /// The current group, if it was opened for exactly this SQL text and identity.
    pub(crate) fn current_mut(&mut self, sql: &str, id: &StatementId) -> Option<&mut BatchGroup> {
        self.groups.last_mut().filter(|group| group.accepts(sql, id))
    }

    /// Append a group; it becomes the current one and closes the previous one to appends.
    pub(crate) fn open_group(&mut self, group: BatchGroup) {
        self.groups.push(group);
    }

    pub(crate) fn take_all(&mut self) -> Vec<BatchGroup> {
        std::mem::take(&mut self.groups)
    }
}
