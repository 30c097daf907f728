//! End-to-end request transaction lifecycle against the memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use txscope::backend::{Backend, BackendError, MemoryBackend};
use txscope::{Callback, Database, RequestContext, TransactionState, TxError};

const WAIT: Duration = Duration::from_secs(5);

fn setup(max_connections: usize) -> (MemoryBackend, Database) {
    let backend = MemoryBackend::new("lifecycle", max_connections);
    let db = Database::with_backend(Arc::new(backend.clone()));
    (backend, db)
}

fn sender(tx: &mpsc::Sender<&'static str>, name: &'static str) -> Callback {
    let tx = tx.clone();
    Box::new(move || {
        let _ = tx.send(name);
    })
}

/// Collect every message that arrives within a short grace period.
fn drain(rx: &mpsc::Receiver<&'static str>) -> Vec<&'static str> {
    let mut seen = Vec::new();
    while let Ok(name) = rx.recv_timeout(Duration::from_millis(200)) {
        seen.push(name);
    }
    seen.sort();
    seen
}

#[test]
fn test_commit_runs_each_commit_callback_once() {
    let (backend, db) = setup(2);
    let ctx = db.new_context(&RequestContext::background()).unwrap();

    let (tx, rx) = mpsc::channel();
    ctx.add_post_commit_callback(Some(sender(&tx, "A"))).unwrap();
    ctx.add_post_commit_callback(Some(sender(&tx, "B"))).unwrap();
    ctx.add_post_rollback_callback(Some(sender(&tx, "R"))).unwrap();
    drop(tx);

    db.resolve(&ctx).unwrap();

    let mut seen = vec![rx.recv_timeout(WAIT).unwrap(), rx.recv_timeout(WAIT).unwrap()];
    seen.sort();
    assert_eq!(seen, vec!["A", "B"]);
    // All senders are gone once the threads finish; R never ran.
    assert!(rx.recv_timeout(WAIT).is_err());

    assert_eq!(backend.stats().committed, 1);
    assert_eq!(backend.stats().rolled_back, 0);
}

#[test]
fn test_rollback_runs_only_rollback_callbacks() {
    let (backend, db) = setup(2);
    let ctx = db.new_context(&RequestContext::background()).unwrap();

    let (tx, rx) = mpsc::channel();
    ctx.add_post_commit_callback(Some(sender(&tx, "A"))).unwrap();
    ctx.add_post_rollback_callback(Some(sender(&tx, "R"))).unwrap();
    drop(tx);

    ctx.mark_for_rollback();
    db.resolve(&ctx).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "R");
    assert!(rx.recv_timeout(WAIT).is_err());

    assert_eq!(ctx.state(), Some(TransactionState::RolledBack));
    assert_eq!(backend.stats().rolled_back, 1);
    assert_eq!(backend.stats().committed, 0);
}

#[test]
fn test_none_callbacks_are_skipped() {
    let (_backend, db) = setup(2);
    let ctx = db.new_context(&RequestContext::background()).unwrap();

    let (tx, rx) = mpsc::channel();
    ctx.add_post_commit_callback(None).unwrap();
    ctx.add_post_commit_callback(Some(sender(&tx, "A"))).unwrap();
    ctx.add_post_commit_callback(None).unwrap();
    drop(tx);

    db.resolve(&ctx).unwrap();
    assert_eq!(drain(&rx), vec!["A"]);
}

#[test]
fn test_second_resolve_is_rejected() {
    let (backend, db) = setup(2);
    let ctx = db.new_context(&RequestContext::background()).unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let (tx, rx) = mpsc::channel();
    ctx.on_commit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(());
    })
    .unwrap();

    db.resolve(&ctx).unwrap();
    let err = db.resolve(&ctx).unwrap_err();
    assert!(matches!(
        err,
        TxError::AlreadyResolved {
            state: TransactionState::Committed,
            ..
        }
    ));

    rx.recv_timeout(WAIT).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(backend.stats().committed, 1);
    assert_eq!(backend.stats().rolled_back, 0);
}

#[test]
fn test_resolve_without_transaction_does_no_io() {
    let (backend, db) = setup(2);
    let before = backend.stats();

    let err = db.resolve(&RequestContext::background()).unwrap_err();
    assert!(matches!(err, TxError::NoTransactionInContext));
    assert_eq!(backend.stats(), before);
}

#[test]
fn test_failed_create_yields_no_context() {
    let (backend, db) = setup(1);

    backend.fail_next_begin();
    let err = db
        .new_context(&RequestContext::background())
        .unwrap_err();
    assert!(matches!(
        err,
        TxError::TransactionOpenError(BackendError::Injected(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(db.active_count(), 0);

    // Pool exhaustion is reported the same way.
    let _held = db.new_context(&RequestContext::background()).unwrap();
    let err = db
        .new_context(&RequestContext::background())
        .unwrap_err();
    assert!(matches!(
        err,
        TxError::TransactionOpenError(BackendError::PoolExhausted { max: 1 })
    ));
}

#[test]
fn test_failed_rollback_runs_no_callbacks() {
    let (backend, db) = setup(2);
    let ctx = db.new_context(&RequestContext::background()).unwrap();

    let (tx, rx) = mpsc::channel();
    ctx.add_post_commit_callback(Some(sender(&tx, "A"))).unwrap();
    ctx.add_post_rollback_callback(Some(sender(&tx, "R"))).unwrap();
    drop(tx);

    ctx.mark_for_rollback();
    backend.set_fail_rollbacks(true);

    let err = db.resolve(&ctx).unwrap_err();
    assert!(matches!(err, TxError::RollbackFailedError(_)));
    assert_eq!(ctx.state(), Some(TransactionState::ResolutionFailed));

    // Dropping the lists drops every sender, so the channel disconnects.
    assert!(matches!(
        rx.recv_timeout(WAIT),
        Err(mpsc::RecvTimeoutError::Disconnected)
    ));
}

#[test]
fn test_changes_after_resolution() {
    let (_backend, db) = setup(2);
    let ctx = db.new_context(&RequestContext::background()).unwrap();
    db.resolve(&ctx).unwrap();

    // Flagging a resolved transaction is ignored.
    ctx.mark_for_rollback();
    assert!(!ctx.is_marked_for_rollback());

    assert!(matches!(
        ctx.on_commit(|| {}),
        Err(TxError::AlreadyResolved { .. })
    ));
    assert!(matches!(
        ctx.transaction_handle().err().unwrap(),
        TxError::AlreadyResolved { .. }
    ));
}

#[test]
fn test_initialize_twice_keeps_first_backend() {
    let db = Database::new();
    db.initialize("memory://first").unwrap();

    let err = db.initialize("memory://second").unwrap_err();
    assert!(matches!(err, TxError::AlreadyInitialized));

    assert_eq!(db.backend().unwrap().name(), "first");
    db.health_check().unwrap();
}

#[test]
fn test_derived_contexts_across_threads() {
    let (backend, db) = setup(4);
    let ctx = db
        .new_context(&RequestContext::with_request_id("req-42"))
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let ctx = ctx.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                ctx.on_rollback(move || {
                    let _ = tx.send(i);
                })
                .unwrap();
                if i == 2 {
                    ctx.mark_for_rollback();
                }
            })
        })
        .collect();
    drop(tx);
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(ctx.is_marked_for_rollback());
    db.resolve(&ctx).unwrap();

    let mut seen: Vec<i32> = (0..4).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert_eq!(backend.stats().rolled_back, 1);
}

#[test]
fn test_shutdown_blocks_new_transactions() {
    let (backend, db) = setup(2);
    let open = db.new_context(&RequestContext::background()).unwrap();

    db.shutdown().unwrap();
    assert!(backend.is_closed());

    let err = db
        .new_context(&RequestContext::background())
        .unwrap_err();
    assert!(matches!(
        err,
        TxError::TransactionOpenError(BackendError::Closed)
    ));

    // The transaction left open at shutdown can no longer commit.
    assert!(matches!(
        db.resolve(&open),
        Err(TxError::CommitFailedError(BackendError::Closed))
    ));
}
