//! Fire-and-forget callback dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::{debug, warn};

use super::record::Callback;

static NEXT_CALLBACK: AtomicU64 = AtomicU64::new(0);

/// Run each callback on its own detached thread.
///
/// `None` entries are skipped. Threads are never joined, so a panicking
/// callback only takes down its own thread. Returns how many threads were
/// started.
pub(crate) fn dispatch(tx_id: &str, callbacks: Vec<Option<Callback>>) -> usize {
    let mut spawned = 0;

    for (index, callback) in callbacks.into_iter().enumerate() {
        let Some(callback) = callback else {
            debug!(tx_id, index, "skipping empty callback");
            continue;
        };

        let n = NEXT_CALLBACK.fetch_add(1, Ordering::Relaxed);
        let spawn = thread::Builder::new()
            .name(format!("txscope-callback-{}", n))
            .spawn(callback);

        match spawn {
            Ok(_) => spawned += 1,
            Err(e) => warn!(tx_id, index, error = %e, "failed to spawn callback thread"),
        }
    }

    spawned
}
