//! Request-scoped transactions.
//!
//! A request gets one [`RequestContext`] carrying one [`TransactionRecord`].
//! Any code holding the context can flag the transaction for rollback or
//! register callbacks. At the end of the request the transaction is resolved
//! once: committed, or rolled back if it was flagged. Then the matching
//! callbacks are dispatched on detached threads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Database                              │
//! │        (new_context / resolve, owns the Backend)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RequestContext                           │
//! │   (cloned through the request, shares one record slot)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransactionRecord                          │
//! │  handle │ rollback flag │ post-commit │ post-rollback       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # State machine
//!
//! ```text
//! Open ──resolve──▶ Resolving ──┬──▶ Committed
//!                               ├──▶ RolledBack
//!                               └──▶ ResolutionFailed
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txscope::{Database, RequestContext};
//!
//! let db = Database::new();
//! db.initialize("memory://")?;
//!
//! let ctx = db.new_context(&RequestContext::background())?;
//! ctx.on_commit(|| println!("committed"))?;
//! ctx.query("SELECT 1")?;
//!
//! if something_went_wrong {
//!     ctx.mark_for_rollback();
//! }
//! db.resolve(&ctx)?;
//! ```

mod context;
mod dispatch;
mod error;
mod record;

pub use context::{HandleGuard, RequestContext};
pub use error::{TxError, TxResult};
pub use record::{Callback, TransactionRecord, TransactionState, DEFAULT_ROLLBACK_POLICY};

pub(crate) use dispatch::dispatch;
pub(crate) use record::{ActiveGuard, Resolution};
