use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keygen::KeyGenerator;
use crate::mapping::StatementId;

/// Kind of SQL a mapped statement issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlCommandType {
    Insert,
    Update,
    Delete,
    Select,
}

impl SqlCommandType {
    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, SqlCommandType::Select)
    }
}

/// Configuration-time definition of one logical SQL operation.
///
/// `sql` is a template whose `#{property}` markers are replaced by positional placeholders at
/// render time. The key generator is fixed here, never per call.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    id: StatementId,
    command: SqlCommandType,
    sql: String,
    key_generator: KeyGenerator,
    timeout: Option<Duration>,
    fetch_size: Option<usize>,
}

impl MappedStatement {
    #[must_use]
    pub fn builder(
        id: StatementId,
        command: SqlCommandType,
        sql: impl Into<String>,
    ) -> MappedStatementBuilder {
        MappedStatementBuilder::new(id, command, sql)
    }

    #[must_use]
    pub fn id(&self) -> &StatementId {
        &self.id
    }

    #[must_use]
    pub fn command(&self) -> SqlCommandType {
        self.command
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    /// Statement-level deadline; `None` falls back to the configuration default.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn fetch_size(&self) -> Option<usize> {
        self.fetch_size
    }
}

/// Fluent builder for [`MappedStatement`].
#[derive(Debug, Clone)]
pub struct MappedStatementBuilder {
    statement: MappedStatement,
}

impl MappedStatementBuilder {
    #[must_use]
    pub fn new(id: StatementId, command: SqlCommandType, sql: impl Into<String>) -> Self {
        Self {
            statement: MappedStatement {
                id,
                command,
                sql: sql.into(),
                key_generator: KeyGenerator::NoOp,
                timeout: None,
                fetch_size: None,
            },
        }
    }

    #[must_use]
    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.statement.key_generator = key_generator;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.statement.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn fetch_size(mut self, fetch_size: usize) -> Self {
        self.statement.fetch_size = Some(fetch_size);
        self
    }

    #[must_use]
    pub fn finish(self) -> MappedStatement {
        self.statement
    }
}
