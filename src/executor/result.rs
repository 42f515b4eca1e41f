use crate::mapping::{ParamObject, StatementId};

/// Outcome of one batch group, produced at flush time.
///
/// `update_counts` has one entry per parameter object, in append order, once the group executed
/// successfully. For the group that failed mid-flush it only covers the statements the store
/// confirmed before the failure.
#[derive(Debug, Clone)]
pub struct BatchResult {
    statement_id: StatementId,
    sql: String,
    parameter_objects: Vec<ParamObject>,
    update_counts: Vec<u64>,
}

impl BatchResult {
    #[must_use]
    pub fn new(
        statement_id: StatementId,
        sql: String,
        parameter_objects: Vec<ParamObject>,
        update_counts: Vec<u64>,
    ) -> Self {
        Self {
            statement_id,
            sql,
            parameter_objects,
            update_counts,
        }
    }

    #[must_use]
    pub fn statement_id(&self) -> &StatementId {
        &self.statement_id
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn parameter_objects(&self) -> &[ParamObject] {
        &self.parameter_objects
    }

    #[must_use]
    pub fn update_counts(&self) -> &[u64] {
        &self.update_counts
    }

    /// True when every parameter set has a count.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.update_counts.len() == self.parameter_objects.len()
    }

    #[must_use]
    pub fn total_updates(&self) -> u64 {
        self.update_counts.iter().sum()
    }
}
