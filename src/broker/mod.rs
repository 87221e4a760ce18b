//! Pushing a cache's shared state out to worker handles.

mod pool;

pub use pool::{WorkerContext, WorkerPool};

use std::sync::Arc;

use tracing::debug;

use crate::engine::{CacheEngine, CacheState, CacheStrategy};
use crate::error::{CacheError, CacheResult};

/// Everything a worker needs to take part in a parent's cache.
pub struct SharedContext<S: CacheStrategy> {
    pub active: bool,
    pub state: Arc<CacheState<S::Slot>>,
    pub extension: S::Context,
}

impl<S: CacheStrategy> Clone for SharedContext<S> {
    fn clone(&self) -> Self {
        Self {
            active: self.active,
            state: Arc::clone(&self.state),
            extension: self.extension.clone(),
        }
    }
}

/// Delivers a [`SharedContext`] to worker handles.
pub trait ContextBroker<S: CacheStrategy> {
    /// Makes `workers` workers adopt `context`, returning once all have.
    fn broadcast(
        &self,
        engine: &CacheEngine<S>,
        context: SharedContext<S>,
        workers: usize,
    ) -> CacheResult<()>;
}

/// Handles driven directly by the caller, usually forks of `engine`.
impl<S: CacheStrategy> ContextBroker<S> for [CacheEngine<S>] {
    fn broadcast(
        &self,
        engine: &CacheEngine<S>,
        context: SharedContext<S>,
        workers: usize,
    ) -> CacheResult<()> {
        if workers > self.len() {
            return Err(CacheError::Broker(format!(
                "asked for {workers} workers but only {} handles were given",
                self.len()
            )));
        }
        for worker in &self[..workers] {
            if worker.family() != engine.family() {
                return Err(CacheError::Broker(
                    "worker handle belongs to a different cache".into(),
                ));
            }
            if worker.same_engine(engine) {
                continue;
            }
            worker.receive_context(context.clone());
        }
        debug!(workers, "context delivered to worker handles");
        Ok(())
    }
}
