//! Memoization of pure functions behind pluggable cache engines.
//!
//! [`MemoryCache`] keeps a bounded number of results per function and evicts
//! the least recently used one. [`FileCache`] keeps every result and persists
//! it to one file per function, merging with whatever other processes wrote
//! when it flushes. Both share one engine, so a computation for a given
//! `(function, arguments)` pair runs at most once at a time across every
//! handle sharing a cache, including [`WorkerPool`] workers.
//!
//! ```no_run
//! use funcache::MemoryCache;
//!
//! fn fib(n: u64) -> u64 {
//!     if n < 2 { n } else { fib(n - 1) + fib(n - 2) }
//! }
//!
//! let cache = MemoryCache::memory();
//! let fib = cache.wrap(fib);
//! assert_eq!(fib.call(30), 832_040);
//! ```

pub mod broker;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod key;
pub mod logger;
pub mod memory;

pub use broker::{ContextBroker, SharedContext, WorkerContext, WorkerPool};
pub use config::{CacheConfig, FileConfig, MemoryConfig};
pub use engine::{CacheEngine, CacheMetricsSnapshot, CacheStrategy, CachedValue, Memoized};
pub use error::{CacheError, CacheResult};
pub use file::{
    FileCache, FileOptions, JsonCodec, Snapshot, SnapshotCodec, StorePhase, flush_registered,
};
pub use key::{CacheKey, FunctionKey, ToCacheKey};
pub use memory::{MemoryCache, MemoryOptions};
