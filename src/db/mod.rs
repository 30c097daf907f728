//! High-level Database API.
//!
//! [`Database`] owns the backend chosen by a connection string and hands
//! out request contexts carrying a transaction.

mod api;
mod config;

pub use api::{Database, DatabaseStats, HEALTH_CHECK_QUERY};
pub use config::{BackendKind, ConnectionConfig, DEFAULT_MEMORY_NAME};
