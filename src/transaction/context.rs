//! Request-scoped context carrying at most one transaction.
//!
//! A [`RequestContext`] is threaded through request-handling code. Cloning
//! it yields a derived context that shares the same transaction record, so
//! any holder can flag the transaction or register callbacks.

use std::fmt;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{error, warn};

use crate::backend::{BackendTransaction, QueryResult};
use crate::transaction::error::{TxError, TxResult};
use crate::transaction::record::{Callback, TransactionRecord, TransactionState};

pub(crate) type SharedRecord = Arc<Mutex<TransactionRecord>>;

/// Exclusive access to the open backend transaction of a context.
pub type HandleGuard<'a> = MappedMutexGuard<'a, dyn BackendTransaction + 'static>;

/// Request metadata plus an optional transaction slot.
#[derive(Clone, Default)]
pub struct RequestContext {
    request_id: Option<Arc<str>>,
    transaction: Option<SharedRecord>,
}

impl RequestContext {
    /// An empty root context.
    pub fn background() -> Self {
        Self::default()
    }

    /// A root context tagged with a request ID for logging.
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(Arc::from(request_id.into())),
            transaction: None,
        }
    }

    /// Get the request ID, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Derive a context carrying `record`. The request ID is inherited.
    pub(crate) fn bind(&self, record: TransactionRecord) -> Self {
        Self {
            request_id: self.request_id.clone(),
            transaction: Some(Arc::new(Mutex::new(record))),
        }
    }

    pub(crate) fn record(&self) -> TxResult<&SharedRecord> {
        self.transaction
            .as_ref()
            .ok_or(TxError::NoTransactionInContext)
    }

    /// Check if this context carries a transaction.
    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Get the transaction ID, if a transaction is bound.
    pub fn transaction_id(&self) -> Option<String> {
        self.transaction
            .as_ref()
            .map(|record| record.lock().id().to_string())
    }

    /// Get the lifecycle state, if a transaction is bound.
    pub fn state(&self) -> Option<TransactionState> {
        self.transaction.as_ref().map(|record| record.lock().state())
    }

    /// Check if the bound transaction will be rolled back on resolution.
    /// False when no transaction is bound.
    pub fn is_marked_for_rollback(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|record| record.lock().is_marked_for_rollback())
    }

    /// Flag the bound transaction for rollback.
    ///
    /// Never fails. Without a bound transaction this only logs an error; on
    /// an already resolved transaction it logs a warning and changes nothing.
    pub fn mark_for_rollback(&self) {
        let Some(record) = &self.transaction else {
            error!(
                request_id = self.request_id().unwrap_or("-"),
                "cannot mark for rollback: no transaction in context"
            );
            return;
        };

        let mut record = record.lock();
        if let Err(e) = record.mark_for_rollback() {
            warn!(tx_id = record.id(), error = %e, "ignoring rollback flag");
        }
    }

    /// Register a callback to run after a successful commit.
    ///
    /// `None` is accepted and skipped at dispatch time.
    pub fn add_post_commit_callback(&self, callback: Option<Callback>) -> TxResult<()> {
        self.record()?.lock().push_post_commit(callback)
    }

    /// Register a callback to run after a successful rollback.
    pub fn add_post_rollback_callback(&self, callback: Option<Callback>) -> TxResult<()> {
        self.record()?.lock().push_post_rollback(callback)
    }

    /// Run `f` after a successful commit.
    pub fn on_commit<F>(&self, f: F) -> TxResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_post_commit_callback(Some(Box::new(f)))
    }

    /// Run `f` after a successful rollback.
    pub fn on_rollback<F>(&self, f: F) -> TxResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_post_rollback_callback(Some(Box::new(f)))
    }

    /// Borrow the open backend transaction.
    ///
    /// The guard locks the whole transaction record. Calling any other
    /// method on this context (or a clone of it) while the guard is alive
    /// deadlocks. Prefer [`RequestContext::with_handle`] for short use.
    pub fn transaction_handle(&self) -> TxResult<HandleGuard<'_>> {
        let guard = self.record()?.lock();
        MutexGuard::try_map(guard, |record| record.handle_mut()).map_err(|record| {
            TxError::AlreadyResolved {
                tx_id: record.id().to_string(),
                state: record.state(),
            }
        })
    }

    /// Run `f` with the open backend transaction.
    pub fn with_handle<F, T>(&self, f: F) -> TxResult<T>
    where
        F: FnOnce(&mut dyn BackendTransaction) -> T,
    {
        let mut handle = self.transaction_handle()?;
        Ok(f(&mut *handle))
    }

    /// Run a query inside the bound transaction.
    pub fn query(&self, sql: &str) -> TxResult<QueryResult> {
        self.with_handle(|handle| handle.query(sql))?
            .map_err(TxError::Query)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RequestContext");
        s.field("request_id", &self.request_id);
        match self.transaction.as_ref().and_then(|r| r.try_lock()) {
            Some(record) => s.field("transaction", &*record),
            None => s.field("transaction", &self.transaction.as_ref().map(|_| "<locked>")),
        };
        s.finish()
    }
}
