use std::sync::Arc;
use std::time::Duration;

use crate::configuration::Configuration;
use crate::cursor::RowCursor;
use crate::error::SqlBatcherError;
use crate::mapping::{BoundStatement, MappedStatement};
use crate::results::RowMapper;
use crate::store::{ExecutionHandle, StoreConnection, fetch_size_for, resolve_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    Fresh,
    Prepared,
    Bound,
}

/// Turns one [`BoundStatement`] into a parameter-bound execution handle and runs it.
///
/// Every execute and `add_to_batch` call needs a preceding `bind_parameters`; both consume the
/// binding, so re-targeting a handle means binding again.
#[derive(Debug)]
pub struct StatementHandler {
    statement: Arc<MappedStatement>,
    bound: BoundStatement,
    default_timeout: Option<Duration>,
    fetch_size: usize,
    state: HandlerState,
}

impl StatementHandler {
    #[must_use]
    pub fn new(
        configuration: &Configuration,
        statement: Arc<MappedStatement>,
        bound: BoundStatement,
    ) -> Self {
        let fetch_size = fetch_size_for(&statement, configuration.default_fetch_size());
        Self {
            statement,
            bound,
            default_timeout: configuration.default_statement_timeout(),
            fetch_size,
            state: HandlerState::Fresh,
        }
    }

    #[must_use]
    pub fn bound_statement(&self) -> &BoundStatement {
        &self.bound
    }

    #[must_use]
    pub fn statement(&self) -> &MappedStatement {
        &self.statement
    }

    /// Statement deadline before any transaction deadline is applied.
    #[must_use]
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement.timeout().or(self.default_timeout)
    }

    /// Prepare the rendered SQL on `connection` with the effective deadline.
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn prepare(
        &mut self,
        connection: &mut dyn StoreConnection,
        transaction_timeout: Option<Duration>,
    ) -> Result<Box<dyn ExecutionHandle>, SqlBatcherError> {
        let timeout = resolve_timeout(self.statement_timeout(), transaction_timeout);
        let handle = connection.prepare(self.bound.sql(), timeout).await?;
        self.state = HandlerState::Prepared;
        Ok(handle)
    }

    /// Write the bound values into the handle's parameter slots.
    ///
    /// The handle may come from an earlier handler of the same batch group.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::BindingMismatch` if the handle is closed or was prepared for
    /// different SQL text.
    pub fn bind_parameters(
        &mut self,
        handle: &mut dyn ExecutionHandle,
    ) -> Result<(), SqlBatcherError> {
        if handle.is_closed() {
            return Err(SqlBatcherError::BindingMismatch(format!(
                "{}: cannot bind to a closed handle",
                self.bound.statement_id()
            )));
        }
        if handle.sql() != self.bound.sql() {
            return Err(SqlBatcherError::BindingMismatch(format!(
                "{}: handle was prepared for different SQL",
                self.bound.statement_id()
            )));
        }
        handle.set_parameters(self.bound.bind_values())?;
        self.state = HandlerState::Bound;
        Ok(())
    }

    /// Queue the bound values on the handle without executing.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::BindingMismatch` without a preceding bind.
    pub fn add_to_batch(&mut self, handle: &mut dyn ExecutionHandle) -> Result<(), SqlBatcherError> {
        self.consume_binding("add_to_batch")?;
        handle.add_batch()
    }

    /// Execute once and reconcile generated keys into the parameter object.
    ///
    /// # Errors
    /// Store errors, or `KeyReconciliation` if keys were expected but not returned.
    pub async fn execute_update(
        &mut self,
        handle: &mut dyn ExecutionHandle,
    ) -> Result<u64, SqlBatcherError> {
        self.consume_binding("execute_update")?;
        let keys = self.statement.key_generator();
        let outcome = handle.execute_update(keys.key_capture()).await?;
        keys.process_after(
            self.statement.id(),
            self.bound.parameter(),
            outcome.generated.as_ref(),
        )?;
        Ok(outcome.affected)
    }

    /// Execute and materialize every row through `mapper`.
    ///
    /// # Errors
    /// Store errors and mapper errors.
    pub async fn execute_query<R, M>(
        &mut self,
        handle: &mut dyn ExecutionHandle,
        mapper: &mut M,
    ) -> Result<Vec<R>, SqlBatcherError>
    where
        M: RowMapper<R> + ?Sized,
    {
        self.consume_binding("execute_query")?;
        let result_set = handle.execute_query().await?;
        result_set
            .results
            .iter()
            .map(|row| mapper.map_row(row))
            .collect()
    }

    /// Start a lazy row sequence; the cursor takes over the handle's release.
    ///
    /// # Errors
    /// Store errors raised while starting the query.
    pub async fn execute_streaming_query(
        &mut self,
        handle: &mut dyn ExecutionHandle,
    ) -> Result<RowCursor<'static>, SqlBatcherError> {
        self.consume_binding("execute_streaming_query")?;
        handle.open_cursor(self.fetch_size).await
    }

    fn consume_binding(&mut self, operation: &str) -> Result<(), SqlBatcherError> {
        match self.state {
            HandlerState::Bound => {
                self.state = HandlerState::Prepared;
                Ok(())
            }
            HandlerState::Prepared => Err(SqlBatcherError::BindingMismatch(format!(
                "{}: {operation} without bound parameters",
                self.bound.statement_id()
            ))),
            HandlerState::Fresh => Err(SqlBatcherError::BindingMismatch(format!(
                "{}: {operation} before prepare",
                self.bound.statement_id()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{StubConnection, StubLog, StubTransaction};
    use crate::keygen::KeyGenerator;
    use crate::mapping::{ParamObject, SqlCommandType, StatementId};
    use crate::store::Transaction;
    use crate::types::{DatabaseType, RowValues};

    fn setup(keygen: KeyGenerator) -> (Configuration, Arc<MappedStatement>, ParamObject) {
        let statement = MappedStatement::builder(
            StatementId::parse("users.insert").unwrap(),
            SqlCommandType::Insert,
            "insert into users (name) values (#{name})",
        )
        .key_generator(keygen)
        .timeout(Duration::from_secs(30))
        .finish();
        let configuration = Configuration::builder(DatabaseType::Sqlite)
            .statement(statement)
            .finish()
            .unwrap();
        let statement = configuration
            .statement(&StatementId::parse("users.insert").unwrap())
            .unwrap();
        (configuration, statement, ParamObject::new().with("name", "ann"))
    }

    fn handler(
        configuration: &Configuration,
        statement: &Arc<MappedStatement>,
        param: &ParamObject,
    ) -> StatementHandler {
        let bound = configuration.render(statement, param).unwrap();
        StatementHandler::new(configuration, Arc::clone(statement), bound)
    }

    #[tokio::test]
    async fn execute_without_bind_is_a_binding_mismatch() {
        let (configuration, statement, param) = setup(KeyGenerator::NoOp);
        let log = StubLog::default();
        let mut tx = StubTransaction::new(&log);
        let mut handler = handler(&configuration, &statement, &param);
        let connection: &mut dyn StoreConnection = tx.connection().await.unwrap();
        let mut handle = handler.prepare(connection, None).await.unwrap();

        let err = handler.execute_update(handle.as_mut()).await.unwrap_err();
        assert!(matches!(err, SqlBatcherError::BindingMismatch(_)));

        handler.bind_parameters(handle.as_mut()).unwrap();
        assert_eq!(handler.execute_update(handle.as_mut()).await.unwrap(), 1);
        // The binding was consumed by the execute.
        assert!(handler.add_to_batch(handle.as_mut()).is_err());
    }

    #[tokio::test]
    async fn fresh_handler_cannot_execute() {
        let (configuration, statement, param) = setup(KeyGenerator::NoOp);
        let log = StubLog::default();
        let mut connection = StubConnection::for_log(&log);
        let mut other = handler(&configuration, &statement, &param);
        let mut handle = other.prepare(&mut connection, None).await.unwrap();
        let mut fresh = handler(&configuration, &statement, &param);
        let err = fresh.execute_update(handle.as_mut()).await.unwrap_err();
        assert!(err.to_string().contains("before prepare"));
    }

    #[tokio::test]
    async fn transaction_deadline_caps_prepare_timeout() {
        let (configuration, statement, param) = setup(KeyGenerator::NoOp);
        let log = StubLog::default();
        let mut connection = StubConnection::for_log(&log);
        let mut handler = handler(&configuration, &statement, &param);
        let handle = handler
            .prepare(&mut connection, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(handle.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(handler.statement_timeout(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn single_update_writes_generated_key() {
        let keygen = KeyGenerator::ReadAfterExecute {
            properties: vec!["id".into()],
            columns: Vec::new(),
        };
        let (configuration, statement, param) = setup(keygen);
        let log = StubLog::default();
        let mut connection = StubConnection::for_log(&log);
        let mut handler = handler(&configuration, &statement, &param);
        let mut handle = handler.prepare(&mut connection, None).await.unwrap();
        handler.bind_parameters(handle.as_mut()).unwrap();
        handler.execute_update(handle.as_mut()).await.unwrap();
        assert_eq!(param.get("id"), Some(RowValues::Int(1)));
    }

    #[tokio::test]
    async fn binding_to_other_sql_is_rejected() {
        let (configuration, statement, param) = setup(KeyGenerator::NoOp);
        let log = StubLog::default();
        let mut connection = StubConnection::for_log(&log);
        let mut handle = connection.prepare("delete from users", None).await.unwrap();
        let mut handler = handler(&configuration, &statement, &param);
        assert!(matches!(
            handler.bind_parameters(handle.as_mut()),
            Err(SqlBatcherError::BindingMismatch(_))
        ));
    }
}
