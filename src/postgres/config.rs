use std::future::Future;

use bb8::{ManageConnection, Pool};
use tokio_postgres::{Client, NoTls};
use tracing::warn;

use crate::error::SqlBatcherError;

pub type PgPool = Pool<PgManager>;

/// Options for configuring a Postgres pool.
#[derive(Debug, Clone, Default)]
pub struct PostgresOptions {
    pub dbname: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_size: Option<u32>,
}

impl PostgresOptions {
    /// Build the driver config after checking the required fields.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` naming the first missing field.
    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config, SqlBatcherError> {
        let dbname = required(self.dbname.as_ref(), "dbname")?;
        let host = required(self.host.as_ref(), "host")?;
        let port = required(self.port.as_ref(), "port")?;
        let user = required(self.user.as_ref(), "user")?;

        let mut config = tokio_postgres::Config::new();
        config.dbname(dbname).host(host).port(*port).user(user);
        if let Some(password) = &self.password {
            config.password(password);
        }
        Ok(config)
    }
}

fn required<'a, T>(value: Option<&'a T>, field: &str) -> Result<&'a T, SqlBatcherError> {
    value.ok_or_else(|| SqlBatcherError::ConfigError(format!("{field} is required")))
}

/// Fluent builder for Postgres options.
#[derive(Debug, Clone, Default)]
pub struct PostgresOptionsBuilder {
    opts: PostgresOptions,
}

impl PostgresOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.opts.dbname = Some(dbname.into());
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.opts.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.opts.port = Some(port);
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.opts.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.opts.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.opts.pool_size = Some(pool_size.max(1));
        self
    }

    #[must_use]
    pub fn finish(self) -> PostgresOptions {
        self.opts
    }

    /// Validate the options and build a bb8 pool.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` for missing fields or
    /// `SqlBatcherError::ConnectionError` if the pool cannot be created.
    pub async fn build(self) -> Result<PgPool, SqlBatcherError> {
        let opts = self.finish();
        let config = opts.to_pg_config()?;
        let mut builder = Pool::builder();
        if let Some(size) = opts.pool_size {
            builder = builder.max_size(size);
        }
        builder
            .build(PgManager::new(config))
            .await
            .map_err(|e| SqlBatcherError::ConnectionError(format!("postgres pool error: {e}")))
    }
}

/// bb8 manager for Postgres clients.
#[derive(Debug, Clone)]
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        async move {
            let (client, connection) = cfg.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "postgres connection task ended with error");
                }
            });
            Ok(client)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.simple_query("SELECT 1").await.map(|_| ()) }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}
