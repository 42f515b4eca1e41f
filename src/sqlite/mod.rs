//! `SQLite` store backend over rusqlite, pooled with bb8.
//!
//! - config: options, the bb8 manager and pool type
//! - connection: blocking-task helpers and the transaction-scoped connection
//! - handle: prepared statement handles
//! - params / query: value conversion and row extraction
//! - transaction: the transaction boundary handed to executors

pub mod config;
pub mod connection;
pub mod handle;
pub mod params;
pub mod query;
pub mod transaction;

pub use config::{
    SharedSqliteConnection, SqliteManager, SqliteOptions, SqliteOptionsBuilder, SqlitePool,
};
pub use connection::SqliteConnection;
pub use handle::SqliteHandle;
pub use query::build_result_set;
pub use transaction::SqliteTransaction;
