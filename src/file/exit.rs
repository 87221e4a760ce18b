use std::sync::Once;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{error, warn};

use super::FileCache;

static FLUSH_TARGETS: Lazy<Mutex<Vec<FileCache>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Schedules `engine` to be flushed when the process exits.
pub(crate) fn flush_at_exit(engine: &FileCache) {
    register_exit_hook();
    let mut targets = FLUSH_TARGETS.lock();
    if !targets.iter().any(|target| target.same_engine(engine)) {
        targets.push(engine.clone());
    }
}

pub(crate) fn cancel_flush_at_exit(engine: &FileCache) {
    FLUSH_TARGETS
        .lock()
        .retain(|target| !target.same_engine(engine));
}

/// Flushes every engine scheduled with [`flush_at_exit`], reporting failures.
/// Handles that share one state are flushed once. Returns the number of
/// engines that failed.
pub fn flush_registered() -> usize {
    let targets = FLUSH_TARGETS.lock().clone();
    let mut flushed: Vec<FileCache> = Vec::with_capacity(targets.len());
    let mut failures = 0;
    for engine in targets {
        if flushed.iter().any(|done| done.shares_state_with(&engine)) {
            continue;
        }
        if let Err(err) = engine.flush() {
            failures += 1;
            error!(%err, "failed to persist cache results; recent results are lost");
            eprintln!("funcache: failed to persist cache results at shutdown: {err}");
        }
        flushed.push(engine);
    }
    failures
}

fn register_exit_hook() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        extern "C" fn at_exit() {
            flush_registered();
        }

        // SAFETY: `at_exit` captures nothing and stays valid for the whole process.
        let status = unsafe { libc::atexit(at_exit) };
        if status != 0 {
            warn!("failed to install cache flush exit hook");
        }
    });
}
