// Statement model - what the executor is asked to run
//
// - id: statement identities (`namespace.name`)
// - param: caller-owned parameter objects that generated keys are written back into
// - statement: configuration-time statement definitions
// - bound: one rendered statement ready for binding

pub mod bound;
pub mod id;
pub mod param;
pub mod statement;

pub use bound::BoundStatement;
pub use id::StatementId;
pub use param::ParamObject;
pub use statement::{MappedStatement, MappedStatementBuilder, SqlCommandType};
