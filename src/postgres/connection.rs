use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::PooledConnection;
use tokio_postgres::NoTls;
use tracing::{debug, warn};

use crate::error::SqlBatcherError;
use crate::store::{ExecutionHandle, HandleCounter, StoreConnection};
use crate::types::DatabaseType;

use super::config::PgManager;
use super::handle::PgHandle;

/// Pooled client shared by a transaction and the handles prepared on it.
pub type SharedPgClient = Arc<PooledConnection<'static, PgManager>>;

/// Await `fut`, cancelling the running query on the server once `timeout` elapses.
pub(crate) async fn with_deadline<T, F>(
    client: &SharedPgClient,
    timeout: Option<Duration>,
    sql: &str,
    fut: F,
) -> Result<T, SqlBatcherError>
where
    F: Future<Output = Result<T, tokio_postgres::Error>>,
{
    let Some(timeout) = timeout else {
        return Ok(fut.await?);
    };
    if timeout.is_zero() {
        return Err(timeout_error(sql));
    }
    if let Ok(result) = tokio::time::timeout(timeout, fut).await {
        return Ok(result?);
    }
    if let Err(e) = client.cancel_token().cancel_query(NoTls).await {
        warn!(error = %e, sql, "failed to cancel timed-out postgres query");
    }
    Err(timeout_error(sql))
}

pub(crate) fn timeout_error(sql: &str) -> SqlBatcherError {
    SqlBatcherError::Timeout(format!("deadline elapsed while executing `{sql}`"))
}

/// Postgres connection scoped to one transaction.
pub struct PgConnection {
    client: SharedPgClient,
    handles: HandleCounter,
}

impl PgConnection {
    pub(crate) fn new(client: SharedPgClient, handles: HandleCounter) -> Self {
        Self { client, handles }
    }

    pub(crate) fn client(&self) -> &SharedPgClient {
        &self.client
    }
}

impl fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("open_handles", &self.handles.open())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreConnection for PgConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn prepare(
        &mut self,
        sql: &str,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn ExecutionHandle>, SqlBatcherError> {
        let statement = with_deadline(&self.client, timeout, sql, self.client.prepare(sql)).await?;
        debug!(sql, parameter_count = statement.params().len(), "prepared postgres statement");
        Ok(Box::new(PgHandle::new(
            Arc::clone(&self.client),
            statement,
            sql.to_owned(),
            timeout,
            self.handles.acquire(),
        )))
    }
}
