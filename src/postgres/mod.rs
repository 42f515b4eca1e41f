//! Postgres store backend over tokio-postgres, pooled with bb8.
//!
//! - config: options, the bb8 manager and pool type
//! - connection: the transaction-scoped connection and deadline helper
//! - handle: prepared statement handles
//! - params / query: value conversion and row extraction
//! - transaction: the transaction boundary handed to executors

pub mod config;
pub mod connection;
pub mod handle;
pub mod params;
pub mod query;
pub mod transaction;

pub use config::{PgManager, PgPool, PostgresOptions, PostgresOptionsBuilder};
pub use connection::{PgConnection, SharedPgClient};
pub use handle::PgHandle;
pub use query::build_result_set_from_statement;
pub use transaction::PostgresTransaction;
