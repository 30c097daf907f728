//! Transactional resources.
//!
//! The transaction layer never talks to a database driver directly. It only
//! sees a [`Backend`] that can begin transactions and a [`BackendTransaction`]
//! that can run queries and be resolved exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Backend                              │
//! │        (begin / close, shared across request threads)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ begin()
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  BackendTransaction                         │
//! │   (query, then exactly one of commit(self) / rollback(self))│
//! └─────────────────────────────────────────────────────────────┘
//!        │                                          │
//!        ▼                                          ▼
//!  ┌─────────────┐                            ┌─────────────┐
//!  │   memory    │                            │     git     │
//!  │ (pool sim)  │                            │ (tx/ branch)│
//!  └─────────────┘                            └─────────────┘
//! ```
//!
//! `commit` and `rollback` take `self: Box<Self>`, so a resolved transaction
//! cannot be touched again.

mod error;
mod git;
mod memory;
mod query;

pub use error::{BackendError, BackendResult};
pub use git::{GitBackend, GitTransaction, MAIN_BRANCH, TX_PREFIX};
pub use memory::{BackendStats, MemoryBackend, MemoryTransaction, DEFAULT_MAX_CONNECTIONS};
pub use query::{evaluate, QueryResult};

use std::sync::Arc;

use crate::db::{BackendKind, ConnectionConfig};

/// A shared transactional resource, usually a connection pool.
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Begin a new transaction.
    fn begin(&self) -> BackendResult<Box<dyn BackendTransaction>>;

    /// Release the resource. Later calls to `begin` fail with [`BackendError::Closed`].
    fn close(&self) -> BackendResult<()>;

    /// Check if `close` has been called.
    fn is_closed(&self) -> bool;
}

/// An open transaction handed out by a [`Backend`].
pub trait BackendTransaction: Send {
    /// Unique transaction ID.
    fn id(&self) -> &str;

    /// Run a query inside the transaction.
    fn query(&mut self, sql: &str) -> BackendResult<QueryResult>;

    /// Commit the transaction.
    fn commit(self: Box<Self>) -> BackendResult<()>;

    /// Roll the transaction back.
    fn rollback(self: Box<Self>) -> BackendResult<()>;
}

/// Open the backend described by a connection config.
pub fn open(config: &ConnectionConfig) -> BackendResult<Arc<dyn Backend>> {
    match &config.kind {
        BackendKind::Memory { name } => Ok(Arc::new(MemoryBackend::new(
            name.clone(),
            config.max_connections,
        ))),
        BackendKind::Git { path } => Ok(Arc::new(GitBackend::open(
            path,
            config.create_if_missing,
        )?)),
    }
}

/// Generate a transaction ID.
pub(crate) fn new_transaction_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
