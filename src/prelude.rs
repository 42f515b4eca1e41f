//! Convenient imports for common functionality.
//!
//! ```rust
//! use sql_batcher::prelude::*;
//!
//! let param = ParamObject::new().with("name", "alice");
//! assert_eq!(param.get("name"), Some(RowValues::Text("alice".into())));
//! ```

pub use crate::configuration::{Configuration, ConfigurationBuilder};
pub use crate::cursor::RowCursor;
pub use crate::error::{BatchExecutorFailure, KeyReconciliationFailure, SqlBatcherError};
pub use crate::executor::{BatchExecutor, BatchResult};
pub use crate::keygen::KeyGenerator;
pub use crate::mapping::{MappedStatement, ParamObject, SqlCommandType, StatementId};
pub use crate::results::{DbRow, RawRows, ResultSet, RowMapper};
pub use crate::store::Transaction;
pub use crate::types::{DatabaseType, RowValues, UpdateOutcome};

#[cfg(feature = "postgres")]
pub use crate::postgres::{PgPool, PostgresOptionsBuilder, PostgresTransaction};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteOptionsBuilder, SqlitePool, SqliteTransaction};
