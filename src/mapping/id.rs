use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::SqlBatcherError;

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid namespace regex")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name regex"));

/// Identity of a logical SQL operation: `namespace.name`.
///
/// Two statements are batch-compatible only if their identities are equal *and* their rendered
/// SQL text is identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId {
    namespace: Arc<str>,
    name: Arc<str>,
}

impl StatementId {
    /// Build an identity from its parts.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` if either part is empty or not identifier-shaped.
    pub fn new(namespace: &str, name: &str) -> Result<Self, SqlBatcherError> {
        if !NAMESPACE_RE.is_match(namespace) {
            return Err(SqlBatcherError::ConfigError(format!(
                "invalid statement namespace '{namespace}'"
            )));
        }
        if !NAME_RE.is_match(name) {
            return Err(SqlBatcherError::ConfigError(format!(
                "invalid statement name '{name}'"
            )));
        }
        Ok(Self {
            namespace: Arc::from(namespace),
            name: Arc::from(name),
        })
    }

    /// Parse a dotted identity; the last segment is the name.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` if there is no namespace or a part is invalid.
    pub fn parse(qualified: &str) -> Result<Self, SqlBatcherError> {
        let (namespace, name) = qualified.rsplit_once('.').ok_or_else(|| {
            SqlBatcherError::ConfigError(format!(
                "statement id '{qualified}' must be namespace-qualified"
            ))
        })?;
        Self::new(namespace, name)
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for StatementId {
    type Err = SqlBatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
