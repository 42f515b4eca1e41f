//! Test utilities for running the Postgres backend against an embedded server.

use std::sync::LazyLock;

use tokio::runtime::Runtime;

/// Shared tokio runtime for starting and stopping embedded servers outside of a test's own
/// runtime.
pub(crate) static SHARED_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("Failed to create tokio runtime for test utilities"));

pub mod postgres;

pub use postgres::*;
