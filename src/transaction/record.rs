//! The per-request transaction record.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::BackendTransaction;
use crate::transaction::error::{TxError, TxResult};

/// A post-resolution hook. Runs once, on its own thread.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Rollback flag value of a freshly created transaction.
pub const DEFAULT_ROLLBACK_POLICY: bool = false;

/// Lifecycle state of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Accepting flags and callbacks.
    Open,
    /// Commit or rollback is in flight.
    Resolving,
    /// Committed; post-commit callbacks were dispatched.
    Committed,
    /// Rolled back; post-rollback callbacks were dispatched.
    RolledBack,
    /// Commit or rollback failed; no callbacks ran.
    ResolutionFailed,
}

impl TransactionState {
    /// Check if resolution has started.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, TransactionState::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Open => "open",
            TransactionState::Resolving => "resolving",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled_back",
            TransactionState::ResolutionFailed => "resolution_failed",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a transaction is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Commit,
    Rollback,
}

/// Counts one record as active on the issuing database until the record is
/// resolved or dropped.
pub(crate) struct ActiveGuard {
    counter: Arc<AtomicUsize>,
}

impl ActiveGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }

    fn belongs_to(&self, counter: &Arc<AtomicUsize>) -> bool {
        Arc::ptr_eq(&self.counter, counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An open backend transaction plus everything a request attached to it.
pub struct TransactionRecord {
    id: String,
    active: Option<ActiveGuard>,
    handle: Option<Box<dyn BackendTransaction>>,
    rollback_flag: bool,
    post_commit: Vec<Option<Callback>>,
    post_rollback: Vec<Option<Callback>>,
    started_at: DateTime<Utc>,
    state: TransactionState,
}

impl TransactionRecord {
    /// Wrap a freshly begun backend transaction.
    pub fn new(handle: Box<dyn BackendTransaction>) -> Self {
        Self {
            id: handle.id().to_string(),
            active: None,
            handle: Some(handle),
            rollback_flag: DEFAULT_ROLLBACK_POLICY,
            post_commit: Vec::new(),
            post_rollback: Vec::new(),
            started_at: Utc::now(),
            state: TransactionState::Open,
        }
    }

    /// Attach the issuing database's active counter.
    pub(crate) fn with_active_guard(mut self, guard: ActiveGuard) -> Self {
        self.active = Some(guard);
        self
    }

    /// Check if this record was issued against `counter`. Records that were
    /// never counted, or are no longer open, match any counter.
    pub(crate) fn issued_by(&self, counter: &Arc<AtomicUsize>) -> bool {
        self.active
            .as_ref()
            .map_or(true, |guard| guard.belongs_to(counter))
    }

    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the transaction began.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_marked_for_rollback(&self) -> bool {
        self.rollback_flag
    }

    /// Number of registered callbacks, `None` entries included.
    pub fn callback_counts(&self) -> (usize, usize) {
        (self.post_commit.len(), self.post_rollback.len())
    }

    fn already_resolved(&self) -> TxError {
        TxError::AlreadyResolved {
            tx_id: self.id.clone(),
            state: self.state,
        }
    }

    fn ensure_open(&self) -> TxResult<()> {
        if self.state.is_resolved() {
            return Err(self.already_resolved());
        }
        Ok(())
    }

    /// Flag the transaction for rollback. Setting it twice is a no-op.
    pub fn mark_for_rollback(&mut self) -> TxResult<()> {
        self.ensure_open()?;
        self.rollback_flag = true;
        Ok(())
    }

    pub fn push_post_commit(&mut self, callback: Option<Callback>) -> TxResult<()> {
        self.ensure_open()?;
        self.post_commit.push(callback);
        Ok(())
    }

    pub fn push_post_rollback(&mut self, callback: Option<Callback>) -> TxResult<()> {
        self.ensure_open()?;
        self.post_rollback.push(callback);
        Ok(())
    }

    /// Mutable access to the backend transaction while it is open.
    pub(crate) fn handle_mut(&mut self) -> Option<&mut (dyn BackendTransaction + 'static)> {
        self.handle.as_deref_mut()
    }

    /// Take the handle out for commit or rollback.
    ///
    /// Moves the record to `Resolving`, so nothing can be registered while
    /// the backend call is in flight.
    pub(crate) fn begin_resolution(
        &mut self,
    ) -> TxResult<(Box<dyn BackendTransaction>, Resolution)> {
        self.ensure_open()?;
        let handle = self.handle.take().ok_or_else(|| self.already_resolved())?;
        self.state = TransactionState::Resolving;

        let resolution = if self.rollback_flag {
            Resolution::Rollback
        } else {
            Resolution::Commit
        };
        Ok((handle, resolution))
    }

    /// Record the outcome and hand back the callbacks to dispatch.
    ///
    /// Both lists are drained; only the one matching a successful outcome is
    /// returned.
    pub(crate) fn finish_resolution(
        &mut self,
        resolution: Resolution,
        succeeded: bool,
    ) -> Vec<Option<Callback>> {
        self.active = None;
        let commit = std::mem::take(&mut self.post_commit);
        let rollback = std::mem::take(&mut self.post_rollback);

        match (resolution, succeeded) {
            (Resolution::Commit, true) => {
                self.state = TransactionState::Committed;
                commit
            }
            (Resolution::Rollback, true) => {
                self.state = TransactionState::RolledBack;
                rollback
            }
            (_, false) => {
                self.state = TransactionState::ResolutionFailed;
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("rollback_flag", &self.rollback_flag)
            .field("post_commit", &self.post_commit.len())
            .field("post_rollback", &self.post_rollback.len())
            .field("started_at", &self.started_at)
            .finish()
    }
}
