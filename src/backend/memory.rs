//! In-process backend with a bounded connection pool.
//!
//! Every transaction holds one connection slot until it is committed, rolled
//! back or dropped. Slots are reused in FIFO order. The backend counts every
//! begin/commit/rollback so callers can check exactly what reached it, and
//! exposes fault-injection switches for exercising failure paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::error::{BackendError, BackendResult};
use super::query::{self, QueryResult};
use super::{new_transaction_id, Backend, BackendTransaction};

/// Default number of connection slots.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Counters for operations that reached the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    /// Transactions successfully begun.
    pub begun: u64,
    /// Transactions successfully committed.
    pub committed: u64,
    /// Transactions successfully rolled back.
    pub rolled_back: u64,
    /// Transactions currently holding a connection slot.
    pub active: usize,
}

struct MemoryBackendInner {
    name: String,
    max_connections: usize,
    available: Mutex<VecDeque<usize>>,
    created: Mutex<usize>,
    closed: AtomicBool,

    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    active: AtomicUsize,

    fail_next_begin: AtomicBool,
    fail_commits: AtomicBool,
    fail_rollbacks: AtomicBool,
}

impl MemoryBackendInner {
    fn acquire_slot(&self) -> BackendResult<usize> {
        // Try to reuse a released slot.
        if let Some(slot) = self.available.lock().pop_front() {
            return Ok(slot);
        }

        // Open a new slot if under limit.
        let mut created = self.created.lock();
        if *created < self.max_connections {
            *created += 1;
            return Ok(*created);
        }

        Err(BackendError::PoolExhausted {
            max: self.max_connections,
        })
    }
}

/// In-process backend.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryBackendInner>,
}

impl MemoryBackend {
    /// Create a backend with the given name and pool size.
    pub fn new(name: impl Into<String>, max_connections: usize) -> Self {
        Self {
            inner: Arc::new(MemoryBackendInner {
                name: name.into(),
                max_connections,
                available: Mutex::new(VecDeque::new()),
                created: Mutex::new(0),
                closed: AtomicBool::new(false),
                begun: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                rolled_back: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                fail_next_begin: AtomicBool::new(false),
                fail_commits: AtomicBool::new(false),
                fail_rollbacks: AtomicBool::new(false),
            }),
        }
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            begun: self.inner.begun.load(Ordering::Relaxed),
            committed: self.inner.committed.load(Ordering::Relaxed),
            rolled_back: self.inner.rolled_back.load(Ordering::Relaxed),
            active: self.inner.active.load(Ordering::Relaxed),
        }
    }

    /// Number of released slots waiting for reuse.
    pub fn available(&self) -> usize {
        self.inner.available.lock().len()
    }

    /// Total number of slots opened so far.
    pub fn created(&self) -> usize {
        *self.inner.created.lock()
    }

    /// Maximum number of slots.
    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Make the next `begin` fail.
    pub fn fail_next_begin(&self) {
        self.inner.fail_next_begin.store(true, Ordering::SeqCst);
    }

    /// Make every commit fail until switched off.
    pub fn set_fail_commits(&self, fail: bool) {
        self.inner.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every rollback fail until switched off.
    pub fn set_fail_rollbacks(&self, fail: bool) {
        self.inner.fail_rollbacks.store(fail, Ordering::SeqCst);
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn begin(&self) -> BackendResult<Box<dyn BackendTransaction>> {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }
        if self.inner.fail_next_begin.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Injected("begin".into()));
        }

        let slot = self.inner.acquire_slot()?;
        self.inner.begun.fetch_add(1, Ordering::Relaxed);
        self.inner.active.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryTransaction {
            id: new_transaction_id(),
            slot,
            pool: Arc::clone(&self.inner),
        }))
    }

    fn close(&self) -> BackendResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A transaction holding one memory backend slot.
pub struct MemoryTransaction {
    id: String,
    slot: usize,
    pool: Arc<MemoryBackendInner>,
}

impl MemoryTransaction {
    /// Connection slot held by this transaction.
    pub fn slot(&self) -> usize {
        self.slot
    }

    fn check_open(&self) -> BackendResult<()> {
        if self.pool.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

impl BackendTransaction for MemoryTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(&mut self, sql: &str) -> BackendResult<QueryResult> {
        self.check_open()?;
        query::evaluate(sql)
    }

    fn commit(self: Box<Self>) -> BackendResult<()> {
        self.check_open()?;
        if self.pool.fail_commits.load(Ordering::SeqCst) {
            return Err(BackendError::Injected("commit".into()));
        }
        self.pool.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> BackendResult<()> {
        self.check_open()?;
        if self.pool.fail_rollbacks.load(Ordering::SeqCst) {
            return Err(BackendError::Injected("rollback".into()));
        }
        self.pool.rolled_back.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // Return the slot whether the transaction was resolved or abandoned.
        self.pool.available.lock().push_back(self.slot);
        self.pool.active.fetch_sub(1, Ordering::Relaxed);
    }
}
