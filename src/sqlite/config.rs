use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool};
use tokio::sync::Mutex;

use crate::error::SqlBatcherError;

use super::connection::run_blocking;

/// Shared `SQLite` connection guarded for use from blocking tasks.
pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

pub type SqlitePool = Pool<SqliteManager>;

const MEMORY_PATH: &str = ":memory:";

/// Options for configuring a `SQLite` pool.
///
/// Every pooled connection to `":memory:"` is its own database, so in-memory pools should keep
/// `pool_size` at 1.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub busy_timeout: Duration,
    pub pool_size: u32,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            busy_timeout: Duration::from_secs(5),
            pool_size: 4,
        }
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.opts.pool_size = pool_size.max(1);
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build a bb8 pool of `SQLite` connections.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConnectionError` if the first connection cannot be opened.
    pub async fn build(self) -> Result<SqlitePool, SqlBatcherError> {
        let opts = self.finish();
        let pool_size = opts.pool_size;
        Pool::builder()
            .max_size(pool_size)
            .build(SqliteManager::new(opts))
            .await
            .map_err(|e| SqlBatcherError::ConnectionError(format!("sqlite pool error: {e}")))
    }
}

/// bb8 manager for `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    opts: SqliteOptions,
}

impl SqliteManager {
    #[must_use]
    pub fn new(opts: SqliteOptions) -> Self {
        Self { opts }
    }
}

fn open_connection(opts: &SqliteOptions) -> Result<rusqlite::Connection, SqlBatcherError> {
    let conn = if opts.db_path == MEMORY_PATH {
        rusqlite::Connection::open_in_memory()?
    } else {
        rusqlite::Connection::open(&opts.db_path)?
    };
    conn.busy_timeout(opts.busy_timeout)?;
    if opts.db_path != MEMORY_PATH {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    Ok(conn)
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = SqlBatcherError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let opts = self.opts.clone();
        async move {
            let conn = tokio::task::spawn_blocking(move || open_connection(&opts))
                .await
                .map_err(|e| {
                    SqlBatcherError::ConnectionError(format!("sqlite connect join error: {e}"))
                })??;
            Ok(Arc::new(Mutex::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let shared = Arc::clone(conn);
        async move {
            run_blocking(shared, |c| {
                c.execute_batch("SELECT 1")
                    .map_err(SqlBatcherError::SqliteError)
            })
            .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
