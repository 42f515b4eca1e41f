use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::PooledConnection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SqlBatcherError;
use crate::store::{HandleCounter, StoreConnection, Transaction};

use super::config::{SharedSqliteConnection, SqliteManager, SqlitePool};
use super::connection::{SqliteConnection, run_blocking};

enum Source {
    Pool(SqlitePool),
    Shared(SharedSqliteConnection),
}

/// `SQLite` transaction boundary for one executor.
///
/// The connection is checked out and `BEGIN` issued on first use. Dropping an active transaction
/// rolls it back synchronously on the dropping thread; prefer finishing transactions explicitly
/// with `commit`, `rollback` or `close`.
///
/// An interrupted write (a statement past its deadline) makes `SQLite` roll back the whole
/// transaction. After that `connection` and `commit` fail until `rollback` or `close` is called,
/// so nothing runs outside the transaction.
pub struct SqliteTransaction {
    source: Source,
    pooled: Option<PooledConnection<'static, SqliteManager>>,
    connection: Option<SqliteConnection>,
    handles: HandleCounter,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    active: bool,
    store_rolled_back: bool,
    closed: bool,
}

impl SqliteTransaction {
    /// Transaction over a connection checked out of `pool` on first use.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self::with_source(Source::Pool(pool))
    }

    /// Transaction over a dedicated connection.
    #[must_use]
    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self::from_shared(Arc::new(Mutex::new(conn)))
    }

    /// Transaction over a connection the caller keeps a handle to.
    #[must_use]
    pub fn from_shared(conn: SharedSqliteConnection) -> Self {
        Self::with_source(Source::Shared(conn))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            pooled: None,
            connection: None,
            handles: HandleCounter::new(),
            timeout: None,
            deadline: None,
            active: false,
            store_rolled_back: false,
            closed: false,
        }
    }

    /// Transaction-wide deadline, counted from `BEGIN`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Execution handles prepared through this transaction and not yet released.
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
                "SQLite transaction already closed".into(),
            ));
        }
        Ok(())
    }

    async fn checkout(&mut self) -> Result<SharedSqliteConnection, SqlBatcherError> {
        if let Some(connection) = &self.connection {
            return Ok(connection.conn_handle());
        }
        let shared = match &self.source {
            Source::Pool(pool) => {
                let pooled = pool.get_owned().await.map_err(|e| {
                    SqlBatcherError::ConnectionError(format!("sqlite checkout error: {e}"))
                })?;
                let shared = Arc::clone(&*pooled);
                self.pooled = Some(pooled);
                shared
            }
            Source::Shared(conn) => Arc::clone(conn),
        };
        self.connection = Some(SqliteConnection::new(
            Arc::clone(&shared),
            self.handles.clone(),
        ));
        Ok(shared)
    }

    /// Notice a transaction `SQLite` ended on its own (interrupted writes roll it back).
    async fn detect_store_rollback(&mut self) {
        if !self.active {
            return;
        }
        let Some(connection) = &self.connection else {
            return;
        };
        if connection.conn_handle().lock().await.is_autocommit() {
            warn!("sqlite rolled back the transaction after an interrupted statement");
            self.active = false;
            self.deadline = None;
            self.store_rolled_back = true;
        }
    }

    fn ensure_not_rolled_back(&self) -> Result<(), SqlBatcherError> {
        if self.store_rolled_back {
            return Err(SqlBatcherError::ConnectionError(
                "store rolled back the transaction; call rollback before reusing it".into(),
            ));
        }
        Ok(())
    }

    async fn finish(&mut self, sql: &'static str) -> Result<(), SqlBatcherError> {
        let Some(connection) = &self.connection else {
            self.active = false;
            return Ok(());
        };
        let conn = connection.conn_handle();
        // The store transaction is over whether or not the statement succeeds.
        self.active = false;
        self.deadline = None;
        run_blocking(conn, move |c| {
            c.execute_batch(sql).map_err(SqlBatcherError::SqliteError)
        })
        .await
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn connection(&mut self) -> Result<&mut dyn StoreConnection, SqlBatcherError> {
        self.ensure_not_closed()?;
        self.detect_store_rollback().await;
        self.ensure_not_rolled_back()?;
        let conn = self.checkout().await?;
        if !self.active {
            run_blocking(conn, |c| {
                c.execute_batch("BEGIN").map_err(SqlBatcherError::SqliteError)
            })
            .await?;
            self.active = true;
            self.deadline = self.timeout.map(|t| Instant::now() + t);
            debug!(timeout = ?self.timeout, "sqlite transaction started");
        }
        match self.connection.as_mut() {
            Some(connection) => Ok(connection),
            None => Err(SqlBatcherError::ConnectionError(
                "sqlite connection missing after checkout".into(),
            )),
        }
    }

    async fn commit(&mut self) -> Result<(), SqlBatcherError> {
        self.ensure_not_closed()?;
        self.detect_store_rollback().await;
        self.ensure_not_rolled_back()?;
        if !self.active {
            return Ok(());
        }
        self.finish("COMMIT").await?;
        debug!("sqlite transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlBatcherError> {
        self.ensure_not_closed()?;
        self.detect_store_rollback().await;
        if std::mem::take(&mut self.store_rolled_back) {
            debug!("sqlite transaction already rolled back by the store");
            return Ok(());
        }
        if !self.active {
            return Ok(());
        }
        self.finish("ROLLBACK").await?;
        debug!("sqlite transaction rolled back");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlBatcherError> {
        if self.closed {
            return Ok(());
        }
        self.detect_store_rollback().await;
        self.store_rolled_back = false;
        let result = if self.active {
            self.finish("ROLLBACK").await
        } else {
            Ok(())
        };
        self.closed = true;
        self.connection = None;
        self.pooled = None;
        result
    }

    fn timeout(&self) -> Option<Duration> {
        match self.deadline {
            Some(deadline) => Some(deadline.saturating_duration_since(Instant::now())),
            None => self.timeout,
        }
    }
}

impl fmt::Debug for SqliteTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteTransaction")
            .field("active", &self.active)
            .field("store_rolled_back", &self.store_rolled_back)
            .field("closed", &self.closed)
            .field("timeout", &self.timeout)
            .field("open_handles", &self.handles.open())
            .finish_non_exhaustive()
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let Some(conn) = self.connection.take().map(|c| c.conn_handle()) else {
            return;
        };
        let pooled = self.pooled.take();
        if let Ok(guard) = conn.try_lock() {
            if guard.is_autocommit() {
                return;
            }
            if let Err(e) = guard.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback of dropped sqlite transaction failed");
            }
            drop(guard);
            drop(pooled);
        } else if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let result = run_blocking(conn, |c| {
                    if c.is_autocommit() {
                        return Ok(());
                    }
                    c.execute_batch("ROLLBACK").map_err(SqlBatcherError::SqliteError)
                })
                .await;
                if let Err(e) = result {
                    warn!(error = %e, "rollback of dropped sqlite transaction failed");
                }
                drop(pooled);
            });
        }
    }
}
