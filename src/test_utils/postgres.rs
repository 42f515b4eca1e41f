use postgresql_embedded::PostgreSQL;
use tracing::info;

use super::SHARED_RUNTIME;
use crate::postgres::{PostgresOptions, PostgresOptionsBuilder};

/// A running embedded `PostgreSQL` instance.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    pub database_url: String,
    /// Options with the server's actual host, port and credentials filled in.
    pub options: PostgresOptions,
}

/// Start an embedded `PostgreSQL` server and create `dbname` on it.
///
/// The returned options point at the new database; build a pool from them inside the test's own
/// runtime.
///
/// # Errors
/// Returns an error if the server cannot be set up or started, the database cannot be created,
/// or the post-start connectivity check fails.
pub fn setup_postgres_embedded(
    dbname: &str,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();
        postgresql.setup().await?;
        postgresql.start().await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let host = settings.host.clone();
        let user = settings.username.clone();
        let password = settings.password.clone();

        postgresql.create_database(dbname).await?;

        let database_url = format!("postgres://{user}:{password}@{host}:{port}/{dbname}");
        info!(port, "embedded postgres started");

        let options = PostgresOptionsBuilder::new()
            .dbname(dbname)
            .host(host)
            .port(port)
            .user(user)
            .password(password)
            .pool_size(4)
            .finish();

        // Quick connection test
        let (client, connection) = options
            .to_pg_config()?
            .connect(tokio_postgres::NoTls)
            .await?;
        let driver = tokio::spawn(connection);
        client.simple_query("SELECT 1").await?;
        drop(client);
        let _ = driver.await;

        Ok(EmbeddedPostgres {
            postgresql,
            port,
            database_url,
            options,
        })
    })
}

/// Stop a previously started embedded `PostgreSQL` instance.
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    SHARED_RUNTIME.block_on(async move {
        let _ = postgresql.stop().await;
    });
}
