//! Batching statement executor for mapped SQL statements.
//!
//! Statements are registered once in a [`Configuration`] under a `namespace.name` id, with
//! `#{property}` markers in their SQL. A [`BatchExecutor`] runs them inside one store
//! [`Transaction`]: updates are deferred into batch groups and flushed in order, queries flush
//! first and then run immediately, and generated keys are written back into the caller's
//! [`ParamObject`]s.
//!
//! Backends live behind features: `sqlite` (rusqlite, the default) and `postgres`
//! (tokio-postgres). Both pool connections with bb8.

pub mod configuration;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod keygen;
pub mod mapping;
pub mod prelude;
pub mod rendering;
pub mod results;
pub mod store;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use configuration::{Configuration, ConfigurationBuilder, StatementDefinition};
pub use cursor::RowCursor;
pub use error::{BatchExecutorFailure, KeyReconciliationFailure, SqlBatcherError};
pub use executor::{BatchExecutor, BatchResult, StatementHandler};
pub use keygen::KeyGenerator;
pub use mapping::{
    BoundStatement, MappedStatement, MappedStatementBuilder, ParamObject, SqlCommandType,
    StatementId,
};
pub use rendering::{PlaceholderRenderer, PlaceholderStyle, SqlRenderer, render_markers};
pub use results::{Columns, DbRow, RawRows, ResultSet, RowMapper};
pub use store::{ExecutionHandle, KeyCapture, StoreConnection, Transaction};
pub use types::{DatabaseType, RowValues, UpdateOutcome};
