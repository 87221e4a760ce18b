//! Bounded in-memory cache with least-recently-used eviction.

mod eviction;

pub use eviction::AccessOrder;

use tracing::debug;

use crate::config::MemoryConfig;
use crate::engine::{CacheEngine, CacheStrategy, SlotData};
use crate::error::CacheResult;
use crate::key::{CacheKey, FunctionKey};

pub type MemoryCache = CacheEngine<LruStrategy>;

/// Per-function options for the memory cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryOptions {
    /// Maximum number of stored results; the engine default when unset.
    pub capacity: Option<usize>,
}

impl MemoryOptions {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LruStrategy {
    config: MemoryConfig,
}

impl LruStrategy {
    pub fn new(config: MemoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }
}

impl CacheStrategy for LruStrategy {
    type Options = MemoryOptions;
    type Slot = AccessOrder;
    // Recency orders live in the shared slots, so nothing extra travels.
    type Context = ();

    fn on_init(
        &self,
        function: &FunctionKey,
        options: &MemoryOptions,
        slot: &mut SlotData<AccessOrder>,
    ) -> CacheResult<()> {
        let capacity = options.capacity.unwrap_or(self.config.default_capacity);
        slot.ext = AccessOrder::new(capacity);
        debug!(function = %function, capacity, "memory cache ready");
        Ok(())
    }

    fn on_access(
        &self,
        _function: &FunctionKey,
        key: &CacheKey,
        slot: &mut SlotData<AccessOrder>,
    ) -> Option<CacheKey> {
        let SlotData {
            entries,
            in_flight,
            ext: order,
        } = slot;

        order.touch(key);
        // An in-flight victim is kept until its computation finishes.
        let victim = order.pop_victim_unless(|candidate| in_flight.contains(candidate))?;
        entries.remove(&victim);
        Some(victim)
    }

    fn on_share_context(&self) {}

    fn on_receive_context(&self, _context: ()) {}

    fn fork(&self) -> Self {
        self.clone()
    }
}

impl CacheEngine<LruStrategy> {
    pub fn memory() -> Self {
        Self::new(LruStrategy::default())
    }

    pub fn memory_with(config: MemoryConfig) -> Self {
        Self::new(LruStrategy::new(config))
    }
}
