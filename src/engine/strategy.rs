use super::CacheEngine;
use super::state::{FunctionSlot, SlotData};
use crate::error::CacheResult;
use crate::key::{CacheKey, FunctionKey};

/// Extension points a cache flavor plugs into the engine.
///
/// Every hook has a no-op default; the bounded-memory and durable flavors
/// implement the subset they need.
pub trait CacheStrategy: Send + Sync + Sized + 'static {
    /// Options supplied when a function is wrapped.
    type Options: Clone + Default + Send + Sync + 'static;
    /// Per-function bookkeeping stored next to the results.
    type Slot: Default + Send + 'static;
    /// Flavor-specific part of the context pushed to workers.
    type Context: Clone + Send + 'static;

    /// Whether results must also be kept in encoded form for persistence.
    fn persists_results(&self) -> bool {
        false
    }

    /// Called once a function has been assigned its key.
    fn on_wrap(&self, _function: &FunctionKey, _options: &Self::Options) {}

    /// Prepares the freshly created sub-store of `function`.
    fn on_init(
        &self,
        _function: &FunctionKey,
        _options: &Self::Options,
        _slot: &mut SlotData<Self::Slot>,
    ) -> CacheResult<()> {
        Ok(())
    }

    /// Called after every sub-store of `engine` has been initialised.
    fn on_initialized(&self, _engine: &CacheEngine<Self>) {}

    /// Called under the function's lock after a hit or a stored computation.
    /// Returns the key evicted as a consequence, if any.
    fn on_access(
        &self,
        _function: &FunctionKey,
        _key: &CacheKey,
        _slot: &mut SlotData<Self::Slot>,
    ) -> Option<CacheKey> {
        None
    }

    /// Persists the sub-store held by `slot`. Returns the number of entries
    /// merged in from outside the process.
    fn on_flush(
        &self,
        _function: &FunctionKey,
        _slot: &FunctionSlot<Self::Slot>,
    ) -> CacheResult<usize> {
        Ok(0)
    }

    /// Builds the flavor's contribution to the shared context.
    fn on_share_context(&self) -> Self::Context;

    /// Adopts the contribution produced by [`CacheStrategy::on_share_context`].
    fn on_receive_context(&self, context: Self::Context);

    /// Fresh process-local copy used by a worker before it adopts a context.
    fn fork(&self) -> Self;
}
