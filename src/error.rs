use thiserror::Error;

use crate::executor::BatchResult;
use crate::mapping::StatementId;

#[derive(Debug, Error)]
pub enum SqlBatcherError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    /// An execute or batch call reached a handle whose parameters were never bound.
    #[error("Binding mismatch: {0}")]
    BindingMismatch(String),

    /// The store rejected a batch partway through a flush.
    #[error(transparent)]
    BatchFailure(Box<BatchExecutorFailure>),

    /// Writes succeeded but generated keys could not be copied back.
    #[error(transparent)]
    KeyReconciliation(Box<KeyReconciliationFailure>),

    #[error("Resource release error: {0}")]
    ResourceRelease(String),

    #[error("Statement timeout: {0}")]
    Timeout(String),

    #[error("Executor was closed")]
    ExecutorClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlBatcherError {
    /// Borrow the batch failure details when this error came from a flush.
    #[must_use]
    pub fn as_batch_failure(&self) -> Option<&BatchExecutorFailure> {
        match self {
            Self::BatchFailure(failure) => Some(failure),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_key_failure(&self) -> Option<&KeyReconciliationFailure> {
        match self {
            Self::KeyReconciliation(failure) => Some(failure),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Failure of one batch group during a flush.
///
/// Carries everything the caller needs to decide on a rollback: the results of the groups that
/// completed before the failing one, the partially populated result of the failing group (its
/// update counts only cover the statements the store confirmed), and the store error itself.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BatchExecutorFailure {
    message: String,
    statement_id: StatementId,
    batch_index: usize,
    successful_results: Vec<BatchResult>,
    failed_result: BatchResult,
    #[source]
    cause: SqlBatcherError,
    release_failures: Vec<SqlBatcherError>,
}

impl BatchExecutorFailure {
    pub(crate) fn new(
        batch_index: usize,
        successful_results: Vec<BatchResult>,
        failed_result: BatchResult,
        cause: SqlBatcherError,
    ) -> Self {
        let statement_id = failed_result.statement_id().clone();
        let mut message = format!("{statement_id} (batch index #{batch_index}) failed.");
        if batch_index > 1 {
            message.push_str(&format!(
                " {} prior sub executor(s) completed successfully, but will be rolled back.",
                batch_index - 1
            ));
        }
        Self {
            message,
            statement_id,
            batch_index,
            successful_results,
            failed_result,
            cause,
            release_failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn statement_id(&self) -> &StatementId {
        &self.statement_id
    }

    /// 1-based position of the failing group in the outstanding batch list.
    #[must_use]
    pub fn batch_index(&self) -> usize {
        self.batch_index
    }

    #[must_use]
    pub fn successful_results(&self) -> &[BatchResult] {
        &self.successful_results
    }

    #[must_use]
    pub fn failed_result(&self) -> &BatchResult {
        &self.failed_result
    }

    #[must_use]
    pub fn cause(&self) -> &SqlBatcherError {
        &self.cause
    }

    /// Errors raised while releasing handles during the cleanup that followed this failure.
    #[must_use]
    pub fn release_failures(&self) -> &[SqlBatcherError] {
        &self.release_failures
    }

    pub(crate) fn add_release_failures(&mut self, failures: Vec<SqlBatcherError>) {
        self.release_failures.extend(failures);
    }

    /// Consume the failure, returning the completed results and the partial result.
    #[must_use]
    pub fn into_results(self) -> (Vec<BatchResult>, BatchResult) {
        (self.successful_results, self.failed_result)
    }
}

impl From<BatchExecutorFailure> for SqlBatcherError {
    fn from(failure: BatchExecutorFailure) -> Self {
        SqlBatcherError::BatchFailure(Box::new(failure))
    }
}

/// Generated keys could not be read or written after (or, for pre-fetch keys, before) execution.
///
/// When raised by a flush the affected-row counts in [`KeyReconciliationFailure::result`] are
/// valid: the writes themselves reached the store.
#[derive(Debug, Error)]
#[error("{statement_id}: key reconciliation failed: {reason}")]
pub struct KeyReconciliationFailure {
    statement_id: StatementId,
    reason: String,
    batch_index: Option<usize>,
    completed_results: Vec<BatchResult>,
    result: Option<BatchResult>,
    release_failures: Vec<SqlBatcherError>,
}

impl KeyReconciliationFailure {
    pub(crate) fn new(statement_id: StatementId, reason: impl Into<String>) -> Self {
        Self {
            statement_id,
            reason: reason.into(),
            batch_index: None,
            completed_results: Vec::new(),
            result: None,
            release_failures: Vec::new(),
        }
    }

    pub(crate) fn in_batch(
        mut self,
        batch_index: usize,
        completed_results: Vec<BatchResult>,
        result: BatchResult,
    ) -> Self {
        self.batch_index = Some(batch_index);
        self.completed_results = completed_results;
        self.result = Some(result);
        self
    }

    pub(crate) fn add_release_failures(&mut self, failures: Vec<SqlBatcherError>) {
        self.release_failures.extend(failures);
    }

    #[must_use]
    pub fn statement_id(&self) -> &StatementId {
        &self.statement_id
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// 1-based group position when the failure happened during a flush.
    #[must_use]
    pub fn batch_index(&self) -> Option<usize> {
        self.batch_index
    }

    #[must_use]
    pub fn completed_results(&self) -> &[BatchResult] {
        &self.completed_results
    }

    /// Result of the group whose keys failed; its update counts are valid.
    #[must_use]
    pub fn result(&self) -> Option<&BatchResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn release_failures(&self) -> &[SqlBatcherError] {
        &self.release_failures
    }
}

impl From<KeyReconciliationFailure> for SqlBatcherError {
    fn from(failure: KeyReconciliationFailure) -> Self {
        SqlBatcherError::KeyReconciliation(Box::new(failure))
    }
}
