//! Cache engine shared by every cache flavor.
//!
//! The engine owns the function registry, the per-function sub-stores and the
//! in-flight bookkeeping that guarantees at most one computation per
//! `(function, arguments)` pair among all handles sharing its state.

mod memoized;
mod metrics;
mod state;
mod strategy;
mod value;

pub use memoized::Memoized;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use state::{CacheState, FunctionSlot, SlotData, SubStore};
pub use strategy::CacheStrategy;
pub use value::CachedValue;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::broker::{ContextBroker, SharedContext};
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, FunctionKey};

static NEXT_FAMILY: AtomicU64 = AtomicU64::new(1);

/// Handle on one "process" view of a cache.
///
/// Clones share everything, including the activation flag. [`CacheEngine::fork`]
/// creates a sibling with its own process-local state, which is how workers
/// start out before adopting a shared context.
pub struct CacheEngine<S: CacheStrategy> {
    core: Arc<EngineCore<S>>,
}

struct EngineCore<S: CacheStrategy> {
    family: u64,
    strategy: S,
    registry: RwLock<AHashMap<FunctionKey, S::Options>>,
    state: RwLock<Arc<CacheState<S::Slot>>>,
    active: AtomicBool,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
    init_failed: AtomicBool,
}

/// Outcome of looking up a call in the cache.
pub(crate) enum Claim<S: CacheStrategy> {
    /// The result is already stored.
    Hit(CachedValue),
    /// The caller now owns the computation and must fulfil the ticket.
    Vacant(Ticket<S>),
    /// The engine is deactivated or failed to initialise; call the function directly.
    Bypass,
}

/// Exclusive right to compute one `(function, arguments)` pair.
///
/// Dropping the ticket without fulfilling it releases the in-flight marker and
/// wakes waiters, which then compute the value themselves.
pub(crate) struct Ticket<S: CacheStrategy> {
    engine: CacheEngine<S>,
    state: Arc<CacheState<S::Slot>>,
    slot: Arc<FunctionSlot<S::Slot>>,
    function: FunctionKey,
    key: CacheKey,
    fulfilled: bool,
}

impl<S: CacheStrategy> CacheEngine<S> {
    pub fn new(strategy: S) -> Self {
        let family = NEXT_FAMILY.fetch_add(1, Ordering::Relaxed);
        Self::from_parts(family, strategy, AHashMap::new(), true)
    }

    fn from_parts(
        family: u64,
        strategy: S,
        registry: AHashMap<FunctionKey, S::Options>,
        active: bool,
    ) -> Self {
        Self {
            core: Arc::new(EngineCore {
                family,
                strategy,
                registry: RwLock::new(registry),
                state: RwLock::new(Arc::new(CacheState::new())),
                active: AtomicBool::new(active),
                init_lock: Mutex::new(()),
                initialized: AtomicBool::new(false),
                init_failed: AtomicBool::new(false),
            }),
        }
    }

    /// Sibling handle with the same registrations but process-local state.
    pub fn fork(&self) -> Self {
        let registry = self.core.registry.read().clone();
        Self::from_parts(
            self.core.family,
            self.core.strategy.fork(),
            registry,
            self.is_active(),
        )
    }

    /// Identifier shared by an engine and all of its forks.
    pub fn family(&self) -> u64 {
        self.core.family
    }

    pub fn same_engine(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub fn strategy(&self) -> &S {
        &self.core.strategy
    }

    /// Assigns `name` to a function. `None` means the name is taken and the
    /// caller must use the function uncached.
    pub fn register(&self, name: impl Into<String>, options: S::Options) -> Option<FunctionKey> {
        let function = FunctionKey::new(name);
        let _init = self.core.init_lock.lock();
        {
            let mut registry = self.core.registry.write();
            if registry.contains_key(&function) {
                warn!(function = %function, "function is already cached; leaving it unwrapped");
                return None;
            }
            registry.insert(function.clone(), options.clone());
        }
        self.core.strategy.on_wrap(&function, &options);

        if self.is_initialized() {
            let slot = self.build_slot(&function, &options).unwrap_or_else(|err| {
                warn!(function = %function, %err, "failed to prepare late registration; starting empty");
                FunctionSlot::new(SlotData::default())
            });
            self.state().insert_slot(function.clone(), slot);
        }

        debug!(function = %function, "registered cached function");
        Some(function)
    }

    pub fn is_registered(&self, function: &FunctionKey) -> bool {
        self.core.registry.read().contains_key(function)
    }

    /// Creates a sub-store for every registered function. Runs automatically
    /// before the first lookup; explicit calls start over from scratch.
    pub fn initialize(&self) -> CacheResult<()> {
        let _init = self.core.init_lock.lock();
        self.initialize_locked()
    }

    fn ensure_initialized(&self) -> CacheResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _init = self.core.init_lock.lock();
        if self.is_initialized() {
            return Ok(());
        }
        self.initialize_locked()
    }

    fn initialize_locked(&self) -> CacheResult<()> {
        let previous = self.state();
        if previous.is_shared() {
            return Err(CacheError::AlreadyShared);
        }

        let registry = self.core.registry.read().clone();
        let state = CacheState::with_metrics(Arc::clone(previous.metrics()));
        for (function, options) in &registry {
            state.insert_slot(function.clone(), self.build_slot(function, options)?);
        }

        *self.core.state.write() = Arc::new(state);
        self.core.init_failed.store(false, Ordering::Release);
        self.core.initialized.store(true, Ordering::Release);
        self.core.strategy.on_initialized(self);
        info!(functions = registry.len(), "cache initialised");
        Ok(())
    }

    fn build_slot(
        &self,
        function: &FunctionKey,
        options: &S::Options,
    ) -> CacheResult<FunctionSlot<S::Slot>> {
        let mut data = SlotData::default();
        self.core.strategy.on_init(function, options, &mut data)?;
        Ok(FunctionSlot::new(data))
    }

    pub fn is_initialized(&self) -> bool {
        self.core.initialized.load(Ordering::Acquire)
    }

    /// Re-enables caching for this handle only.
    pub fn activate(&self) {
        self.core.active.store(true, Ordering::SeqCst);
    }

    /// Disables caching for this handle only; calls go straight to the function.
    pub fn deactivate(&self) {
        self.core.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.core.active.load(Ordering::SeqCst)
    }

    pub fn is_shared(&self) -> bool {
        self.state().is_shared()
    }

    /// Looks up `key` and, on a miss, claims the computation.
    ///
    /// Waits without timeout while another caller computes the same key. A
    /// caller that dies without unwinding leaves the key in flight forever.
    /// A failed lazy initialisation is reported once; afterwards lookups
    /// bypass the cache until [`CacheEngine::initialize`] succeeds.
    pub(crate) fn claim(&self, function: &FunctionKey, key: CacheKey) -> CacheResult<Claim<S>> {
        if !self.is_active() || self.core.init_failed.load(Ordering::Acquire) {
            self.state().metrics().record_bypass();
            return Ok(Claim::Bypass);
        }
        if let Err(err) = self.ensure_initialized() {
            if !self.core.init_failed.swap(true, Ordering::AcqRel) {
                error!(%err, "cache initialisation failed; calls bypass the cache");
            }
            self.state().metrics().record_bypass();
            return Ok(Claim::Bypass);
        }

        let state = self.state();
        let slot = state
            .slot(function)
            .ok_or_else(|| CacheError::UnknownFunction(function.to_string()))?;

        let mut data = slot.lock();
        let mut waited = false;
        loop {
            if let Some(value) = data.entries.get(&key).cloned() {
                state.metrics().record_hit();
                self.after_access(&state, function, &key, &mut data);
                return Ok(Claim::Hit(value));
            }
            if !data.in_flight.contains(&key) {
                break;
            }
            if !waited {
                waited = true;
                state.metrics().record_wait();
                debug!(function = %function, key = %key, "waiting for in-flight computation");
            }
            slot.wait(&mut data);
        }
        data.in_flight.insert(key.clone());
        drop(data);

        state.metrics().record_miss();
        Ok(Claim::Vacant(Ticket {
            engine: self.clone(),
            state,
            slot,
            function: function.clone(),
            key,
            fulfilled: false,
        }))
    }

    /// Returns the stored result for `key`, computing it with `compute` on a miss.
    pub fn get<F>(
        &self,
        function: &FunctionKey,
        key: CacheKey,
        compute: F,
    ) -> CacheResult<CachedValue>
    where
        F: FnOnce() -> CachedValue,
    {
        match self.claim(function, key)? {
            Claim::Hit(value) => Ok(value),
            Claim::Bypass => Ok(compute()),
            Claim::Vacant(ticket) => {
                let value = compute();
                ticket.fulfill(value.clone());
                Ok(value)
            }
        }
    }

    fn after_access(
        &self,
        state: &CacheState<S::Slot>,
        function: &FunctionKey,
        key: &CacheKey,
        data: &mut SlotData<S::Slot>,
    ) {
        if let Some(evicted) = self.core.strategy.on_access(function, key, data) {
            state.metrics().record_eviction();
            debug!(function = %function, key = %evicted, "evicted least recently used entry");
        }
    }

    /// Shares this handle's state with `workers` workers reached through `broker`.
    pub fn enable_multi_process<B>(&self, broker: &B, workers: usize) -> CacheResult<()>
    where
        B: ContextBroker<S> + ?Sized,
    {
        self.ensure_initialized()?;
        let state = self.state();
        state.mark_shared();
        let context = SharedContext {
            active: self.is_active(),
            state,
            extension: self.core.strategy.on_share_context(),
        };
        info!(workers, "sharing cache state with workers");
        broker.broadcast(self, context, workers)
    }

    /// Adopts a context pushed by [`CacheEngine::enable_multi_process`].
    pub fn receive_context(&self, context: SharedContext<S>) {
        let _init = self.core.init_lock.lock();
        self.core.active.store(context.active, Ordering::SeqCst);
        *self.core.state.write() = context.state;
        self.core.strategy.on_receive_context(context.extension);
        self.core.init_failed.store(false, Ordering::Release);
        self.core.initialized.store(true, Ordering::Release);
        debug!(family = self.core.family, "adopted shared cache state");
    }

    /// Persists every sub-store through the strategy. Keeps going after a
    /// failure and returns the first error.
    pub fn flush(&self) -> CacheResult<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        let state = self.state();
        let mut functions = state.functions();
        functions.sort();

        let mut first_error = None;
        for function in functions {
            let Some(slot) = state.slot(&function) else {
                continue;
            };
            match self.core.strategy.on_flush(&function, &slot) {
                Ok(merged) => {
                    state.metrics().record_merge(merged);
                    state.metrics().record_flush();
                }
                Err(err) => {
                    warn!(function = %function, %err, "flush failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.state().metrics().snapshot()
    }

    pub fn functions(&self) -> Vec<FunctionKey> {
        self.state().functions()
    }

    /// Number of stored results for `function`.
    pub fn len(&self, function: &FunctionKey) -> usize {
        self.state()
            .slot(function)
            .map_or(0, |slot| slot.lock().entries.len())
    }

    pub fn contains(&self, function: &FunctionKey, key: &CacheKey) -> bool {
        self.state()
            .slot(function)
            .is_some_and(|slot| slot.lock().entries.contains_key(key))
    }

    pub fn in_flight(&self, function: &FunctionKey) -> Vec<CacheKey> {
        self.state()
            .slot(function)
            .map(|slot| slot.lock().in_flight.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether both handles currently point at the same cache state.
    pub fn shares_state_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state(), &other.state())
    }

    pub(crate) fn state(&self) -> Arc<CacheState<S::Slot>> {
        Arc::clone(&self.core.state.read())
    }
}

impl<S: CacheStrategy> Clone for CacheEngine<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: CacheStrategy> Ticket<S> {
    /// Stores `value`, clears the in-flight marker and wakes waiters.
    pub fn fulfill(mut self, value: CachedValue) {
        let mut data = self.slot.lock();
        data.entries.insert(self.key.clone(), value);
        data.in_flight.remove(&self.key);
        self.engine
            .after_access(&self.state, &self.function, &self.key, &mut data);
        drop(data);
        self.fulfilled = true;
        self.slot.notify();
    }
}

impl<S: CacheStrategy> Drop for Ticket<S> {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        self.slot.lock().in_flight.remove(&self.key);
        self.slot.notify();
        debug!(function = %self.function, key = %self.key, "released in-flight marker without a result");
    }
}
