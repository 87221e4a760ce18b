use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::{AHashMap, AHashSet};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use super::metrics::CacheMetrics;
use super::value::CachedValue;
use crate::key::{CacheKey, FunctionKey};

/// Stored results of one function, keyed by call arguments.
pub type SubStore = AHashMap<CacheKey, CachedValue>;

/// Everything guarded by a function's lock.
///
/// `ext` holds strategy bookkeeping (recency order, persistence phase) so that
/// it is mutated under the same lock as the results it describes.
#[derive(Debug, Default)]
pub struct SlotData<X> {
    pub entries: SubStore,
    pub in_flight: AHashSet<CacheKey>,
    pub ext: X,
}

#[derive(Debug)]
pub struct FunctionSlot<X> {
    data: Mutex<SlotData<X>>,
    done: Condvar,
}

impl<X> FunctionSlot<X> {
    pub fn new(data: SlotData<X>) -> Self {
        Self {
            data: Mutex::new(data),
            done: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotData<X>> {
        self.data.lock()
    }

    /// Blocks until some in-flight computation of this function completes.
    pub fn wait(&self, guard: &mut MutexGuard<'_, SlotData<X>>) {
        self.done.wait(guard);
    }

    pub fn notify(&self) {
        self.done.notify_all();
    }
}

/// The part of an engine that becomes visible to workers once shared.
#[derive(Debug)]
pub struct CacheState<X> {
    slots: RwLock<AHashMap<FunctionKey, Arc<FunctionSlot<X>>>>,
    shared: AtomicBool,
    metrics: Arc<CacheMetrics>,
}

impl<X> CacheState<X> {
    pub fn new() -> Self {
        Self::with_metrics(CacheMetrics::new())
    }

    pub fn with_metrics(metrics: Arc<CacheMetrics>) -> Self {
        Self {
            slots: RwLock::new(AHashMap::new()),
            shared: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn slot(&self, function: &FunctionKey) -> Option<Arc<FunctionSlot<X>>> {
        self.slots.read().get(function).cloned()
    }

    pub fn insert_slot(&self, function: FunctionKey, slot: FunctionSlot<X>) {
        self.slots.write().insert(function, Arc::new(slot));
    }

    pub fn functions(&self) -> Vec<FunctionKey> {
        self.slots.read().keys().cloned().collect()
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    pub fn mark_shared(&self) {
        self.shared.store(true, Ordering::Release);
    }
}

impl<X> Default for CacheState<X> {
    fn default() -> Self {
        Self::new()
    }
}
