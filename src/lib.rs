//! txscope - Request-scoped database transactions
//!
//! A request gets one context carrying one database transaction. Code
//! handling the request can flag the transaction for rollback or register
//! callbacks. At the end of the request the transaction is committed or
//! rolled back exactly once, and the matching callbacks are fired on
//! background threads.
//!
//! # Example
//!
//! ```no_run
//! use txscope::{Database, RequestContext};
//!
//! let db = Database::new();
//! db.initialize("memory://").unwrap();
//!
//! let ctx = db.new_context(&RequestContext::background()).unwrap();
//! ctx.on_commit(|| println!("send confirmation email")).unwrap();
//! ctx.query("SELECT 1").unwrap();
//! db.resolve(&ctx).unwrap();
//! ```

pub mod backend;
pub mod db;
pub mod transaction;

pub use db::{ConnectionConfig, Database, DatabaseStats};
pub use transaction::{Callback, RequestContext, TransactionState, TxError, TxResult};
