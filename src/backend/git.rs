//! Git-backed transactional resource.
//!
//! Each transaction gets its own branch (`tx/{id}`) forked from `main`.
//! On commit, `main` is fast-forwarded to the branch tip with
//! compare-and-swap semantics: if `main` moved since the transaction began,
//! the commit fails with [`BackendError::Conflict`]. On rollback the branch
//! is simply deleted. Either way the transaction branch does not survive
//! resolution.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use git2::{BranchType, Oid, Repository, Signature};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::{BackendError, BackendResult};
use super::query::{self, QueryResult};
use super::{new_transaction_id, Backend, BackendTransaction};

/// The branch transactions commit into.
pub const MAIN_BRANCH: &str = "main";

/// Prefix for transaction branches.
pub const TX_PREFIX: &str = "tx/";

fn ref_path(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

fn branch_commit(repo: &Repository, branch: &str) -> BackendResult<Oid> {
    let reference = repo.find_reference(&ref_path(branch))?;
    Ok(reference.peel_to_commit()?.id())
}

fn delete_branch(repo: &Repository, branch: &str) -> BackendResult<()> {
    repo.find_branch(branch, BranchType::Local)?.delete()?;
    Ok(())
}

/// Create the repository with an empty root commit on `main`.
fn init_repository(path: &Path) -> BackendResult<Repository> {
    let repo = Repository::init(path)?;
    {
        let tree_id = repo.treebuilder(None)?.write()?;
        let tree = repo.find_tree(tree_id)?;
        let signature = Signature::now("txscope", "txscope@localhost")?;
        repo.commit(
            Some(&ref_path(MAIN_BRANCH)),
            &signature,
            &signature,
            "[txscope] Initialize repository",
            &tree,
            &[],
        )?;
        repo.set_head(&ref_path(MAIN_BRANCH))?;
    }
    Ok(repo)
}

struct GitBackendInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    closed: AtomicBool,
    /// IDs of transactions whose branches are still live.
    active: Mutex<HashSet<String>>,
}

impl GitBackendInner {
    fn untrack(&self, tx_id: &str) {
        self.active.lock().remove(tx_id);
    }
}

/// Git repository backend.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
/// All repository access is serialized through one lock, which also
/// serializes commits to `main`.
#[derive(Clone)]
pub struct GitBackend {
    inner: Arc<GitBackendInner>,
}

impl GitBackend {
    /// Open the repository at `path`, initializing it when allowed.
    pub fn open(path: impl AsRef<Path>, create_if_missing: bool) -> BackendResult<Self> {
        let path = path.as_ref();
        let repo = if path.join(".git").exists() {
            Repository::open(path)?
        } else if create_if_missing {
            init_repository(path)?
        } else {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no repository at {}", path.display()),
            )));
        };

        Ok(Self {
            inner: Arc::new(GitBackendInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                closed: AtomicBool::new(false),
                active: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current tip of `main`.
    pub fn head(&self) -> BackendResult<Oid> {
        let repo = self.inner.repo.lock();
        branch_commit(&repo, MAIN_BRANCH)
    }

    /// Number of transactions with a live branch.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Names of all transaction branches present in the repository.
    pub fn transaction_branches(&self) -> BackendResult<Vec<String>> {
        let repo = self.inner.repo.lock();
        let mut names = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                if name.starts_with(TX_PREFIX) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Delete transaction branches that no live transaction owns, e.g. left
    /// behind by a crashed process. Returns how many were removed.
    pub fn cleanup_abandoned(&self) -> BackendResult<usize> {
        let branches = self.transaction_branches()?;
        let active = self.inner.active.lock().clone();

        let repo = self.inner.repo.lock();
        let mut cleaned = 0;
        for branch in branches {
            let tx_id = &branch[TX_PREFIX.len()..];
            if !active.contains(tx_id) && delete_branch(&repo, &branch).is_ok() {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Run a closure with the repository locked.
    pub fn with_repo<F, T>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&Repository) -> BackendResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }
}

impl Backend for GitBackend {
    fn name(&self) -> &str {
        "git"
    }

    fn begin(&self) -> BackendResult<Box<dyn BackendTransaction>> {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }

        let id = new_transaction_id();
        let branch = format!("{}{}", TX_PREFIX, id);

        let base = {
            let repo = self.inner.repo.lock();
            let base = branch_commit(&repo, MAIN_BRANCH)?;
            let commit = repo.find_commit(base)?;
            repo.branch(&branch, &commit, false)?;
            base
        };

        self.inner.active.lock().insert(id.clone());
        debug!(tx_id = %id, %branch, base = %base, "created transaction branch");

        Ok(Box::new(GitTransaction {
            id,
            branch,
            base,
            finished: false,
            backend: Arc::clone(&self.inner),
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

/// A transaction living on its own `tx/` branch.
pub struct GitTransaction {
    id: String,
    branch: String,
    base: Oid,
    finished: bool,
    backend: Arc<GitBackendInner>,
}

impl GitTransaction {
    /// Get the branch name for this transaction.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Get the commit `main` pointed to when the transaction began.
    pub fn base_commit(&self) -> Oid {
        self.base
    }

    fn check_open(&self) -> BackendResult<()> {
        if self.backend.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    /// Move `main` to the transaction tip if nobody else moved it first.
    fn fast_forward_main(&self, repo: &Repository) -> BackendResult<()> {
        let tip = branch_commit(repo, &self.branch)?;
        let mut main = repo.find_reference(&ref_path(MAIN_BRANCH))?;
        let current = main.peel_to_commit()?.id();

        if current != self.base {
            return Err(BackendError::Conflict {
                branch: MAIN_BRANCH.to_string(),
            });
        }
        if tip != current {
            main.set_target(tip, &format!("[txscope] commit transaction {}", self.id))?;
        }
        Ok(())
    }
}

impl BackendTransaction for GitTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(&mut self, sql: &str) -> BackendResult<QueryResult> {
        self.check_open()?;
        query::evaluate(sql)
    }

    fn commit(mut self: Box<Self>) -> BackendResult<()> {
        self.check_open()?;
        self.finished = true;

        let result = {
            let repo = self.backend.repo.lock();
            let result = self.fast_forward_main(&repo);
            // Clean up the transaction branch regardless of outcome
            if let Err(e) = delete_branch(&repo, &self.branch) {
                warn!(
                    tx_id = %self.id,
                    branch = %self.branch,
                    error = %e,
                    "failed to delete transaction branch"
                );
            }
            result
        };

        self.backend.untrack(&self.id);
        result
    }

    fn rollback(mut self: Box<Self>) -> BackendResult<()> {
        self.check_open()?;
        self.finished = true;

        let result = {
            let repo = self.backend.repo.lock();
            delete_branch(&repo, &self.branch)
        };

        self.backend.untrack(&self.id);
        result
    }
}

impl Drop for GitTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned without resolution: discard the branch.
        let repo = self.backend.repo.lock();
        if let Err(e) = delete_branch(&repo, &self.branch) {
            warn!(tx_id = %self.id, error = %e, "failed to delete abandoned transaction branch");
        }
        drop(repo);
        self.backend.untrack(&self.id);
    }
}
