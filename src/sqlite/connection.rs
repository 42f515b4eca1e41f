use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::InterruptHandle;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use crate::error::SqlBatcherError;
use crate::store::{ExecutionHandle, HandleCounter, StoreConnection};
use crate::types::DatabaseType;

use super::config::SharedSqliteConnection;
use super::handle::SqliteHandle;

/// Run `func` on the connection from a blocking task.
pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, SqlBatcherError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlBatcherError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| SqlBatcherError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// Run `func` from a blocking task, interrupting the connection once `deadline` passes.
///
/// The closure's own output is returned even when it finished after an interrupt; callers map
/// late errors to timeouts.
pub(crate) async fn run_blocking_until<F, R>(
    conn: SharedSqliteConnection,
    deadline: Option<Instant>,
    func: F,
) -> Result<R, SqlBatcherError>
where
    F: FnOnce(&mut rusqlite::Connection) -> R + Send + 'static,
    R: Send + 'static,
{
    let interrupt = match deadline {
        Some(_) => Some(conn.lock().await.get_interrupt_handle()),
        None => None,
    };
    let mut task = tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    });
    let joined = match (deadline, interrupt) {
        (Some(deadline), Some(interrupt)) => {
            tokio::select! {
                joined = &mut task => joined,
                () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    interrupt_until_done(&interrupt, &mut task).await
                }
            }
        }
        _ => task.await,
    };
    joined
        .map_err(|e| SqlBatcherError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))
}

const INTERRUPT_RETRY: Duration = Duration::from_millis(20);

/// Interrupt the connection until `task` finishes.
///
/// `SQLite` clears a pending interrupt when a statement starts on an idle connection, so a single
/// interrupt can be lost if it lands before the worker begins stepping.
pub(crate) async fn interrupt_until_done<R>(
    interrupt: &InterruptHandle,
    task: &mut JoinHandle<R>,
) -> Result<R, JoinError> {
    loop {
        interrupt.interrupt();
        if let Ok(joined) = tokio::time::timeout(INTERRUPT_RETRY, &mut *task).await {
            return joined;
        }
    }
}

pub(crate) fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// `SQLite` connection scoped to one transaction.
pub struct SqliteConnection {
    conn: SharedSqliteConnection,
    handles: HandleCounter,
}

impl SqliteConnection {
    pub(crate) fn new(conn: SharedSqliteConnection, handles: HandleCounter) -> Self {
        Self { conn, handles }
    }

    pub(crate) fn conn_handle(&self) -> SharedSqliteConnection {
        Arc::clone(&self.conn)
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("open_handles", &self.handles.open())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreConnection for SqliteConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn prepare(
        &mut self,
        sql: &str,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn ExecutionHandle>, SqlBatcherError> {
        let owned = sql.to_owned();
        let parameter_count = run_blocking(self.conn_handle(), move |c| {
            let stmt = c.prepare_cached(&owned)?;
            Ok(stmt.parameter_count())
        })
        .await?;
        debug!(sql, parameter_count, "prepared sqlite statement");
        Ok(Box::new(SqliteHandle::new(
            self.conn_handle(),
            sql.to_owned(),
            parameter_count,
            timeout,
            self.handles.acquire(),
        )))
    }
}
