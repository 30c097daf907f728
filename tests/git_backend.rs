//! Request transactions on top of a git repository.

use std::sync::mpsc;
use std::time::Duration;

use tempfile::TempDir;
use txscope::backend::{BackendError, GitBackend, TX_PREFIX};
use txscope::db::{BackendKind, ConnectionConfig};
use txscope::{Database, RequestContext, TransactionState, TxError};

fn connection(dir: &TempDir) -> String {
    format!("git://{}", dir.path().join("repo").display())
}

#[test]
fn test_initialize_creates_repository() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    db.initialize(&connection(&dir)).unwrap();

    assert!(dir.path().join("repo").join(".git").exists());
    match db.config().unwrap().kind {
        BackendKind::Git { path } => assert_eq!(path, dir.path().join("repo")),
        other => panic!("unexpected backend {:?}", other),
    }
    db.health_check().unwrap();
}

#[test]
fn test_missing_repository_without_create() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();

    let err = db
        .initialize(&format!("{}?create_if_missing=false", connection(&dir)))
        .unwrap_err();
    assert!(matches!(err, TxError::Backend(BackendError::Io(_))));
    assert!(!db.is_initialized());
}

#[test]
fn test_commit_and_rollback_leave_no_branches() {
    let dir = TempDir::new().unwrap();
    let backend = GitBackend::open(dir.path(), true).unwrap();
    let head = backend.head().unwrap();
    let db = Database::with_backend(std::sync::Arc::new(backend.clone()));

    let committed = db.new_context(&RequestContext::background()).unwrap();
    let rolled_back = db.new_context(&RequestContext::background()).unwrap();

    let branches = backend.transaction_branches().unwrap();
    assert_eq!(branches.len(), 2);
    assert!(branches.iter().all(|b| b.starts_with(TX_PREFIX)));

    db.resolve(&committed).unwrap();
    rolled_back.mark_for_rollback();
    db.resolve(&rolled_back).unwrap();

    assert!(backend.transaction_branches().unwrap().is_empty());
    assert_eq!(backend.head().unwrap(), head);
    assert_eq!(db.stats().committed, 1);
    assert_eq!(db.stats().rolled_back, 1);
}

#[test]
fn test_conflict_fails_commit_without_callbacks() {
    let dir = TempDir::new().unwrap();
    let backend = GitBackend::open(dir.path(), true).unwrap();
    let db = Database::with_backend(std::sync::Arc::new(backend.clone()));

    let ctx = db.new_context(&RequestContext::background()).unwrap();
    let (tx, rx) = mpsc::channel::<()>();
    ctx.on_commit(move || {
        let _ = tx.send(());
    })
    .unwrap();

    // Move main behind the transaction's back.
    backend
        .with_repo(|repo| {
            let parent = repo.head()?.peel_to_commit()?;
            let tree = parent.tree()?;
            let sig = git2::Signature::now("other", "other@localhost")?;
            repo.commit(Some("HEAD"), &sig, &sig, "concurrent", &tree, &[&parent])?;
            Ok(())
        })
        .unwrap();

    let err = db.resolve(&ctx).unwrap_err();
    assert!(matches!(
        err,
        TxError::CommitFailedError(BackendError::Conflict { .. })
    ));
    assert_eq!(ctx.state(), Some(TransactionState::ResolutionFailed));
    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(5)),
        Err(mpsc::RecvTimeoutError::Disconnected)
    ));
}

#[test]
fn test_shutdown_closes_repository_backend() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    db.initialize_with_config(ConnectionConfig::git(dir.path().join("repo")))
        .unwrap();

    db.shutdown().unwrap();
    assert!(db.backend().unwrap().is_closed());
    assert!(matches!(
        db.health_check(),
        Err(TxError::TransactionOpenError(BackendError::Closed))
    ));
}
