use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SqlBatcherError;
use crate::keygen::KeyGenerator;
use crate::mapping::{BoundStatement, MappedStatement, ParamObject, SqlCommandType, StatementId};
use crate::rendering::{PlaceholderRenderer, SqlRenderer};
use crate::types::DatabaseType;

const DEFAULT_FETCH_SIZE: usize = 256;

/// Statement registry plus the settings every executor of a session shares.
#[derive(Debug)]
pub struct Configuration {
    database_type: DatabaseType,
    statements: HashMap<StatementId, Arc<MappedStatement>>,
    renderer: Arc<dyn SqlRenderer>,
    default_statement_timeout: Option<Duration>,
    default_fetch_size: usize,
}

impl Configuration {
    /// Start a configuration rendering `#{property}` markers for `database_type`.
    #[must_use]
    pub fn builder(database_type: DatabaseType) -> ConfigurationBuilder {
        ConfigurationBuilder::new(database_type)
    }

    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Register a statement.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` if the id is already registered or the key
    /// generator is malformed.
    pub fn add_statement(&mut self, statement: MappedStatement) -> Result<(), SqlBatcherError> {
        if self.statements.contains_key(statement.id()) {
            return Err(SqlBatcherError::ConfigError(format!(
                "statement '{}' is already known",
                statement.id()
            )));
        }
        statement.key_generator().validate().map_err(|reason| {
            SqlBatcherError::ConfigError(format!("statement '{}': {reason}", statement.id()))
        })?;
        self.statements
            .insert(statement.id().clone(), Arc::new(statement));
        Ok(())
    }

    /// Register every statement of a JSON array of definitions.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` for malformed JSON or invalid definitions.
    pub fn load_json(&mut self, json: &str) -> Result<(), SqlBatcherError> {
        let definitions: Vec<StatementDefinition> = serde_json::from_str(json)
            .map_err(|e| SqlBatcherError::ConfigError(format!("invalid statement JSON: {e}")))?;
        for definition in definitions {
            self.add_statement(definition.into_statement()?)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn has_statement(&self, id: &StatementId) -> bool {
        self.statements.contains_key(id)
    }

    /// Look up a statement definition.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` for unknown ids.
    pub fn statement(&self, id: &StatementId) -> Result<Arc<MappedStatement>, SqlBatcherError> {
        self.statements.get(id).cloned().ok_or_else(|| {
            SqlBatcherError::ConfigError(format!("statement '{id}' is not known"))
        })
    }

    /// Registered ids in sorted order.
    #[must_use]
    pub fn statement_ids(&self) -> Vec<StatementId> {
        let mut ids = self.statements.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.statements
            .keys()
            .map(|id| id.namespace().to_owned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn renderer(&self) -> &dyn SqlRenderer {
        self.renderer.as_ref()
    }

    /// Render a statement against a parameter object.
    ///
    /// # Errors
    /// Propagates rendering errors.
    pub fn render(
        &self,
        statement: &MappedStatement,
        parameter: &ParamObject,
    ) -> Result<BoundStatement, SqlBatcherError> {
        self.renderer
            .render(statement.id(), statement.sql(), parameter)
    }

    #[must_use]
    pub fn default_statement_timeout(&self) -> Option<Duration> {
        self.default_statement_timeout
    }

    #[must_use]
    pub fn default_fetch_size(&self) -> usize {
        self.default_fetch_size
    }
}

/// Options builder for [`Configuration`].
#[derive(Debug)]
pub struct ConfigurationBuilder {
    database_type: DatabaseType,
    statements: Vec<MappedStatement>,
    json_sources: Vec<String>,
    renderer: Option<Arc<dyn SqlRenderer>>,
    default_statement_timeout: Option<Duration>,
    default_fetch_size: usize,
}

impl ConfigurationBuilder {
    #[must_use]
    pub fn new(database_type: DatabaseType) -> Self {
        Self {
            database_type,
            statements: Vec::new(),
            json_sources: Vec::new(),
            renderer: None,
            default_statement_timeout: None,
            default_fetch_size: DEFAULT_FETCH_SIZE,
        }
    }

    #[must_use]
    pub fn statement(mut self, statement: MappedStatement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Queue a JSON array of statement definitions, parsed by `finish`.
    #[must_use]
    pub fn statements_json(mut self, json: impl Into<String>) -> Self {
        self.json_sources.push(json.into());
        self
    }

    /// Replace the default `#{property}` renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn SqlRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[must_use]
    pub fn default_statement_timeout(mut self, timeout: Duration) -> Self {
        self.default_statement_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn default_fetch_size(mut self, fetch_size: usize) -> Self {
        self.default_fetch_size = fetch_size.max(1);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` for duplicate ids or invalid definitions.
    pub fn finish(self) -> Result<Configuration, SqlBatcherError> {
        let renderer = self.renderer.unwrap_or_else(|| {
            Arc::new(PlaceholderRenderer::new(self.database_type.into()))
        });
        let mut configuration = Configuration {
            database_type: self.database_type,
            statements: HashMap::with_capacity(self.statements.len()),
            renderer,
            default_statement_timeout: self.default_statement_timeout,
            default_fetch_size: self.default_fetch_size,
        };
        for statement in self.statements {
            configuration.add_statement(statement)?;
        }
        for json in &self.json_sources {
            configuration.load_json(json)?;
        }
        Ok(configuration)
    }
}

/// JSON shape of one statement definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatementDefinition {
    pub namespace: String,
    pub name: String,
    pub command: SqlCommandType,
    pub sql: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fetch_size: Option<usize>,
    #[serde(default)]
    pub key_generator: KeyGenerator,
}

impl StatementDefinition {
    /// Convert into a [`MappedStatement`].
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ConfigError` if the id is invalid.
    pub fn into_statement(self) -> Result<MappedStatement, SqlBatcherError> {
        let id = StatementId::new(&self.namespace, &self.name)?;
        let mut builder = MappedStatement::builder(id, self.command, self.sql)
            .key_generator(self.key_generator);
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(fetch_size) = self.fetch_size {
            builder = builder.fetch_size(fetch_size);
        }
        Ok(builder.finish())
    }
}
