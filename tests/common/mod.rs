#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use sql_batcher::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber once per test binary; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        score INTEGER NOT NULL DEFAULT 0
    );";

pub const STATEMENTS: &str = r#"[
    {"namespace": "users", "name": "insert", "command": "insert",
     "sql": "INSERT INTO users (name, score) VALUES (#{name}, #{score})",
     "key_generator": {"kind": "read_after_execute", "properties": ["id"]}},
    {"namespace": "users", "name": "insert_returning", "command": "insert",
     "sql": "INSERT INTO users (name, score) VALUES (#{name}, #{score}) RETURNING id",
     "key_generator": {"kind": "read_after_execute", "properties": ["id"], "columns": ["id"]}},
    {"namespace": "users", "name": "insert_plain", "command": "insert",
     "sql": "INSERT INTO users (name, score) VALUES (#{name}, #{score})"},
    {"namespace": "users", "name": "insert_prefetched", "command": "insert",
     "sql": "INSERT INTO users (id, name, score) VALUES (#{id}, #{name}, #{score})",
     "key_generator": {"kind": "pre_fetch",
                       "sql": "SELECT COALESCE(MAX(id), 0) + 100 FROM users",
                       "property": "id"}},
    {"namespace": "users", "name": "set_score", "command": "update",
     "sql": "UPDATE users SET score = #{score} WHERE name = #{name}"},
    {"namespace": "users", "name": "count", "command": "select",
     "sql": "SELECT COUNT(*) AS n FROM users"},
    {"namespace": "users", "name": "by_name", "command": "select",
     "sql": "SELECT id, name, score FROM users WHERE name = #{name}"},
    {"namespace": "users", "name": "all", "command": "select",
     "sql": "SELECT name FROM users ORDER BY id", "fetch_size": 2},
    {"namespace": "slow", "name": "spin", "command": "select",
     "sql": "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000000) SELECT COUNT(*) FROM c",
     "timeout_ms": 100},
    {"namespace": "slow", "name": "spin_unbounded", "command": "select",
     "sql": "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000000) SELECT COUNT(*) FROM c"},
    {"namespace": "slow", "name": "insert_spin", "command": "insert",
     "sql": "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000000) INSERT INTO users (name, score) SELECT #{name}, COUNT(*) FROM c",
     "timeout_ms": 100}
]"#;

pub fn configuration() -> Arc<Configuration> {
    Arc::new(
        Configuration::builder(DatabaseType::Sqlite)
            .statements_json(STATEMENTS)
            .finish()
            .unwrap(),
    )
}

pub fn id(qualified: &str) -> StatementId {
    StatementId::parse(qualified).unwrap()
}

pub fn user(name: &str, score: i64) -> ParamObject {
    ParamObject::new().with("name", name).with("score", score)
}

/// Create the schema in a fresh file database and return a pool over it.
pub async fn file_pool(dir: &Path) -> SqlitePool {
    let path = dir.join("batcher.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    drop(conn);
    SqliteOptionsBuilder::new(path.to_string_lossy().into_owned())
        .pool_size(2)
        .build()
        .await
        .unwrap()
}

pub fn memory_connection() -> SharedSqliteConnection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    Arc::new(tokio::sync::Mutex::new(conn))
}

pub async fn count_users<T: Transaction>(executor: &mut BatchExecutor<T>) -> i64 {
    let counts = executor
        .submit_query(&id("users.count"), &ParamObject::new(), |row: &DbRow| {
            row.get("n")
                .and_then(RowValues::as_int)
                .copied()
                .ok_or_else(|| SqlBatcherError::ExecutionError("missing count".into()))
        })
        .await
        .unwrap();
    counts[0]
}

pub use sql_batcher::sqlite::SharedSqliteConnection;
