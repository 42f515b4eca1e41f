use crate::mapping::{ParamObject, StatementId};
use crate::types::RowValues;

/// Rendered SQL, the identity it came from, and the values to bind, in placeholder order.
///
/// Built fresh for every logical call and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    sql: String,
    statement_id: StatementId,
    bind_values: Vec<RowValues>,
    parameter: ParamObject,
}

impl BoundStatement {
    #[must_use]
    pub fn new(
        sql: String,
        statement_id: StatementId,
        bind_values: Vec<RowValues>,
        parameter: ParamObject,
    ) -> Self {
        Self {
            sql,
            statement_id,
            bind_values,
            parameter,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn statement_id(&self) -> &StatementId {
        &self.statement_id
    }

    #[must_use]
    pub fn bind_values(&self) -> &[RowValues] {
        &self.bind_values
    }

    /// The parameter object the values were read from.
    #[must_use]
    pub fn parameter(&self) -> &ParamObject {
        &self.parameter
    }
}
