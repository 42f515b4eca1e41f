use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SqlBatcherError;
use crate::store::{HandleCounter, StoreConnection, Transaction};

use super::config::PgPool;
use super::connection::{PgConnection, SharedPgClient};

/// Postgres transaction boundary for one executor.
///
/// Checks a client out of the pool and issues `BEGIN` on first use. Dropping an active
/// transaction spawns a rollback.
pub struct PostgresTransaction {
    pool: PgPool,
    connection: Option<PgConnection>,
    handles: HandleCounter,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    active: bool,
    closed: bool,
}

impl PostgresTransaction {
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            connection: None,
            handles: HandleCounter::new(),
            timeout: None,
            deadline: None,
            active: false,
            closed: false,
        }
    }

    /// Transaction-wide deadline, counted from `BEGIN`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.handles.open()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn ensure_not_closed(&self) -> Result<(), SqlBatcherError> {
        if self.closed {
            return Err(SqlBatcherError::ExecutionError(
                "postgres transaction already closed".into(),
            ));
        }
        Ok(())
    }

    async fn checkout(&mut self) -> Result<SharedPgClient, SqlBatcherError> {
        if let Some(connection) = &self.connection {
            return Ok(Arc::clone(connection.client()));
        }
        let pooled = self.pool.get_owned().await.map_err(|e| {
            SqlBatcherError::ConnectionError(format!("postgres checkout error: {e}"))
        })?;
        let client = Arc::new(pooled);
        self.connection = Some(PgConnection::new(
            Arc::clone(&client),
            self.handles.clone(),
        ));
        Ok(client)
    }

    async fn finish(&mut self, sql: &str) -> Result<(), SqlBatcherError> {
        let Some(connection) = &self.connection else {
            self.active = false;
            return Ok(());
        };
        let client = Arc::clone(connection.client());
        self.active = false;
        self.deadline = None;
        client.batch_execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn connection(&mut self) -> Result<&mut dyn StoreConnection, SqlBatcherError> {
        self.ensure_not_closed()?;
        let client = self.checkout().await?;
        if !self.active {
            client.batch_execute("BEGIN").await?;
            self.active = true;
            self.deadline = self.timeout.map(|t| Instant::now() + t);
            debug!(timeout = ?self.timeout, "postgres transaction started");
        }
        match self.connection.as_mut() {
            Some(connection) => Ok(connection),
            None => Err(SqlBatcherError::ConnectionError(
                "postgres connection missing after checkout".into(),
            )),
        }
    }

    async fn commit(&mut self) -> Result<(), SqlBatcherError> {
        self.ensure_not_closed()?;
        if self.active {
            self.finish("COMMIT").await?;
            debug!("postgres transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlBatcherError> {
        self.ensure_not_closed()?;
        if self.active {
            self.finish("ROLLBACK").await?;
            debug!("postgres transaction rolled back");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlBatcherError> {
        if self.closed {
            return Ok(());
        }
        let result = if self.active {
            self.finish("ROLLBACK").await
        } else {
            Ok(())
        };
        self.closed = true;
        self.connection = None;
        result
    }

    fn timeout(&self) -> Option<Duration> {
        match self.deadline {
            Some(deadline) => Some(deadline.saturating_duration_since(Instant::now())),
            None => self.timeout,
        }
    }
}

impl fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTransaction")
            .field("active", &self.active)
            .field("closed", &self.closed)
            .field("timeout", &self.timeout)
            .field("open_handles", &self.handles.open())
            .finish_non_exhaustive()
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.active
            && let Some(connection) = self.connection.take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let client = Arc::clone(connection.client());
            handle.spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    warn!(error = %e, "rollback of dropped postgres transaction failed");
                }
            });
        }
    }
}
