//! Database API - owns the backend and drives request transactions.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{self, Backend};
use crate::db::config::ConnectionConfig;
use crate::transaction::{
    dispatch, ActiveGuard, RequestContext, Resolution, TransactionRecord, TxError, TxResult,
};

/// Query run by [`Database::health_check`].
pub const HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// Counters for transactions created through a [`Database`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Created and neither resolved nor dropped.
    pub active: usize,
    /// Successfully committed.
    pub committed: u64,
    /// Successfully rolled back.
    pub rolled_back: u64,
    /// Commit or rollback failed.
    pub failed: u64,
}

#[derive(Default)]
struct DatabaseInner {
    backend: RwLock<Option<Arc<dyn Backend>>>,
    config: RwLock<Option<ConnectionConfig>>,
    /// Shared with every open record issued here.
    active: Arc<AtomicUsize>,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    failed: AtomicU64,
}

/// The database service.
///
/// Holds at most one backend, installed once by [`Database::initialize`] or
/// up front by [`Database::with_backend`]. Cheap to clone; clones share the
/// backend and the counters.
#[derive(Clone, Default)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Create an uninitialized database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database around an already opened backend.
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        let db = Self::new();
        *db.inner.backend.write() = Some(backend);
        db
    }

    /// Parse `connection_string` and open the backend it names.
    ///
    /// Fails with [`TxError::AlreadyInitialized`] if a backend is installed;
    /// the existing backend stays in place.
    pub fn initialize(&self, connection_string: &str) -> TxResult<()> {
        if self.is_initialized() {
            return Err(TxError::AlreadyInitialized);
        }
        let config: ConnectionConfig = connection_string.parse()?;
        self.initialize_with_config(config)
    }

    /// Open the backend described by `config`.
    pub fn initialize_with_config(&self, config: ConnectionConfig) -> TxResult<()> {
        // Held across open so concurrent callers cannot both succeed.
        let mut slot = self.inner.backend.write();
        if slot.is_some() {
            return Err(TxError::AlreadyInitialized);
        }

        let backend = backend::open(&config)?;
        info!(backend = backend.name(), connection = %config, "database initialized");

        *slot = Some(backend);
        *self.inner.config.write() = Some(config);
        Ok(())
    }

    /// Check if a backend is installed.
    pub fn is_initialized(&self) -> bool {
        self.inner.backend.read().is_some()
    }

    /// The configuration passed to `initialize`, if any.
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.inner.config.read().clone()
    }

    /// Get the installed backend.
    pub fn backend(&self) -> TxResult<Arc<dyn Backend>> {
        self.inner
            .backend
            .read()
            .clone()
            .ok_or(TxError::NotInitialized)
    }

    /// Begin a transaction and return a context derived from `parent`
    /// carrying it.
    pub fn new_context(&self, parent: &RequestContext) -> TxResult<RequestContext> {
        if let Some(tx_id) = parent.transaction_id() {
            return Err(TxError::TransactionAlreadyBound { tx_id });
        }

        let backend = self.backend()?;
        let handle = backend.begin().map_err(|e| {
            warn!(
                backend = backend.name(),
                request_id = parent.request_id().unwrap_or("-"),
                error = %e,
                "failed to begin transaction"
            );
            TxError::TransactionOpenError(e)
        })?;

        let record = TransactionRecord::new(handle)
            .with_active_guard(ActiveGuard::new(Arc::clone(&self.inner.active)));
        debug!(
            tx_id = record.id(),
            request_id = parent.request_id().unwrap_or("-"),
            backend = backend.name(),
            "began transaction"
        );

        Ok(parent.bind(record))
    }

    /// Commit the context's transaction, or roll it back if it was flagged,
    /// then dispatch the matching callbacks without waiting for them.
    ///
    /// A transaction resolves once. Later calls fail with
    /// [`TxError::AlreadyResolved`] and never reach the backend.
    pub fn resolve(&self, ctx: &RequestContext) -> TxResult<()> {
        let shared = ctx.record()?;
        let (handle, resolution, tx_id, started_at) = {
            let mut record = shared.lock();
            if !record.issued_by(&self.inner.active) {
                return Err(TxError::ForeignTransaction {
                    tx_id: record.id().to_string(),
                });
            }
            let (handle, resolution) = record.begin_resolution()?;
            (handle, resolution, record.id().to_string(), record.started_at())
        };

        // Backend I/O happens without the record lock held.
        let outcome = match resolution {
            Resolution::Commit => handle.commit().map_err(TxError::CommitFailedError),
            Resolution::Rollback => handle.rollback().map_err(TxError::RollbackFailedError),
        };

        let (callbacks, state) = {
            let mut record = shared.lock();
            let callbacks = record.finish_resolution(resolution, outcome.is_ok());
            (callbacks, record.state())
        };

        let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
        let request_id = ctx.request_id().unwrap_or("-");

        match &outcome {
            Ok(()) => {
                let counter = match resolution {
                    Resolution::Commit => &self.inner.committed,
                    Resolution::Rollback => &self.inner.rolled_back,
                };
                counter.fetch_add(1, Ordering::Relaxed);

                info!(
                    tx_id = %tx_id,
                    request_id,
                    elapsed_ms,
                    state = %state,
                    callbacks = callbacks.len(),
                    "transaction resolved"
                );
                dispatch(&tx_id, callbacks);
            }
            Err(e) => {
                self.inner.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    tx_id = %tx_id,
                    request_id,
                    elapsed_ms,
                    error = %e,
                    "transaction resolution failed"
                );
            }
        }

        outcome
    }

    /// Run `f` inside a fresh transaction.
    ///
    /// The transaction is flagged for rollback if `f` fails and resolved
    /// either way. `f` must not resolve the context itself.
    pub fn with_transaction<F, T, E>(&self, parent: &RequestContext, f: F) -> Result<T, E>
    where
        F: FnOnce(&RequestContext) -> Result<T, E>,
        E: From<TxError>,
    {
        let ctx = self.new_context(parent)?;

        let result = f(&ctx);
        if result.is_err() {
            ctx.mark_for_rollback();
        }

        match (result, self.resolve(&ctx)) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(resolve_err)) => {
                error!(error = %resolve_err, "rollback after failed closure also failed");
                Err(e)
            }
        }
    }

    /// Open a short-lived transaction, run [`HEALTH_CHECK_QUERY`] and
    /// resolve it.
    pub fn health_check(&self) -> TxResult<()> {
        let ctx = self.new_context(&RequestContext::background())?;

        if let Err(e) = ctx.query(HEALTH_CHECK_QUERY) {
            ctx.mark_for_rollback();
            if let Err(resolve_err) = self.resolve(&ctx) {
                error!(error = %resolve_err, "failed to resolve health check transaction");
            }
            return Err(e);
        }

        self.resolve(&ctx)
    }

    /// Close the backend. Later calls to `new_context` fail.
    pub fn shutdown(&self) -> TxResult<()> {
        let backend = self.backend()?;

        let active = self.active_count();
        if active > 0 {
            warn!(active, "shutting down with open transactions");
        }

        backend.close()?;
        info!(backend = backend.name(), "database shut down");
        Ok(())
    }

    /// Number of transactions created here and neither resolved nor dropped.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Get transaction counters.
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            active: self.active_count(),
            committed: self.inner.committed.load(Ordering::Relaxed),
            rolled_back: self.inner.rolled_back.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config())
            .field("stats", &self.stats())
            .finish()
    }
}
