//! Batching executor: groups deferred updates, flushes them in order and reports per-group
//! results.

mod batch;
mod handler;
mod result;
mod state;
#[cfg(test)]
mod testing;

pub use batch::BatchExecutor;
pub use handler::StatementHandler;
pub use result::BatchResult;
