//! Durable cache flavor: one file per function, loaded at initialization and
//! merged back into the file on flush.

pub mod codec;
mod exit;
pub mod path;

pub use codec::{JsonCodec, Snapshot, SnapshotCodec};
pub use exit::flush_registered;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::FileConfig;
use crate::engine::{CacheEngine, CacheStrategy, CachedValue, FunctionSlot, SlotData, SubStore};
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, FunctionKey};

pub type FileCache = CacheEngine<FileStrategy>;

/// Per-function options for the file cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOptions {
    /// File holding the results; derived from the root and function key when unset.
    pub path: Option<PathBuf>,
}

impl FileOptions {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// Lifecycle of one persisted sub-store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorePhase {
    #[default]
    Unloaded,
    Loaded,
    Active,
    Flushed,
}

pub struct FileStrategy {
    config: FileConfig,
    codec: Arc<dyn SnapshotCodec>,
    paths: RwLock<AHashMap<FunctionKey, PathBuf>>,
}

impl FileStrategy {
    pub fn new(config: FileConfig) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    pub fn with_codec(config: FileConfig, codec: Arc<dyn SnapshotCodec>) -> Self {
        Self {
            config,
            codec,
            paths: RwLock::new(AHashMap::new()),
        }
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    pub fn path_of(&self, function: &FunctionKey) -> Option<PathBuf> {
        self.paths.read().get(function).cloned()
    }

    fn default_path(&self, function: &FunctionKey) -> PathBuf {
        let extension = self
            .config
            .extension
            .as_deref()
            .unwrap_or_else(|| self.codec.extension());
        path::default_cache_path(&self.config.root, function, extension)
    }

    fn resolve(&self, function: &FunctionKey, options: &FileOptions) -> PathBuf {
        if let Some(path) = self.path_of(function) {
            return path;
        }
        let path = options
            .path
            .clone()
            .unwrap_or_else(|| self.default_path(function));
        self.paths.write().insert(function.clone(), path.clone());
        path
    }

    /// `None` when the file does not exist yet.
    fn read_snapshot(&self, path: &Path) -> CacheResult<Option<Snapshot>> {
        match fs::read(path) {
            Ok(bytes) => self.codec.decode(&bytes).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::io("read", path, err)),
        }
    }

    fn write_snapshot(&self, path: &Path, bytes: &[u8]) -> CacheResult<()> {
        path::ensure_parent(path)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file =
            NamedTempFile::new_in(dir).map_err(|err| CacheError::io("create", dir, err))?;
        file.write_all(bytes)
            .map_err(|err| CacheError::io("write", file.path(), err))?;
        file.persist(path)
            .map_err(|err| CacheError::io("replace", path, err.error))?;
        Ok(())
    }
}

impl CacheStrategy for FileStrategy {
    type Options = FileOptions;
    type Slot = StorePhase;
    type Context = Arc<AHashMap<FunctionKey, PathBuf>>;

    fn on_wrap(&self, function: &FunctionKey, options: &FileOptions) {
        let path = self.resolve(function, options);
        debug!(function = %function, path = %path.display(), "file cache path resolved");
    }

    fn on_init(
        &self,
        function: &FunctionKey,
        options: &FileOptions,
        slot: &mut SlotData<StorePhase>,
    ) -> CacheResult<()> {
        let path = self.resolve(function, options);
        slot.entries = match self.read_snapshot(&path) {
            Ok(Some(entries)) => entries
                .into_iter()
                .map(|(key, value)| (key, CachedValue::encoded(value)))
                .collect(),
            Ok(None) => SubStore::new(),
            Err(err) if err.is_decode() => {
                warn!(path = %path.display(), %err, "ignoring malformed cache file");
                SubStore::new()
            }
            Err(err) => return Err(err),
        };
        slot.ext = StorePhase::Loaded;
        info!(
            function = %function,
            entries = slot.entries.len(),
            path = %path.display(),
            "loaded cache file"
        );
        Ok(())
    }

    fn persists_results(&self) -> bool {
        true
    }

    fn on_initialized(&self, engine: &FileCache) {
        if self.config.flush_on_exit {
            exit::flush_at_exit(engine);
        }
    }

    fn on_access(
        &self,
        _function: &FunctionKey,
        _key: &CacheKey,
        slot: &mut SlotData<StorePhase>,
    ) -> Option<CacheKey> {
        slot.ext = StorePhase::Active;
        None
    }

    fn on_flush(
        &self,
        function: &FunctionKey,
        slot: &FunctionSlot<StorePhase>,
    ) -> CacheResult<usize> {
        let path = self
            .path_of(function)
            .ok_or_else(|| CacheError::UnknownFunction(function.to_string()))?;

        let on_disk = match self.read_snapshot(&path) {
            Ok(entries) => entries,
            Err(err) if err.is_decode() => {
                warn!(path = %path.display(), %err, "cache file is malformed; overwriting it");
                None
            }
            Err(err) => return Err(err),
        };

        let (bytes, merged, skipped) = {
            let mut data = slot.lock();
            let mut merged = 0;
            for (key, value) in on_disk.into_iter().flatten() {
                if !data.entries.contains_key(&key) {
                    data.entries.insert(key, CachedValue::encoded(value));
                    merged += 1;
                }
            }
            let snapshot: Snapshot = data
                .entries
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), value.as_encoded()?.clone())))
                .collect();
            let skipped = data.entries.len() - snapshot.len();
            (self.codec.encode(&snapshot)?, merged, skipped)
        };
        if skipped > 0 {
            warn!(function = %function, skipped, "results without an encoded form were not persisted");
        }

        self.write_snapshot(&path, &bytes)?;
        slot.lock().ext = StorePhase::Flushed;
        info!(function = %function, merged, path = %path.display(), "flushed cache file");
        Ok(merged)
    }

    fn on_share_context(&self) -> Self::Context {
        Arc::new(self.paths.read().clone())
    }

    fn on_receive_context(&self, context: Self::Context) {
        *self.paths.write() = (*context).clone();
    }

    fn fork(&self) -> Self {
        Self {
            config: self.config.clone(),
            codec: Arc::clone(&self.codec),
            paths: RwLock::new(self.paths.read().clone()),
        }
    }
}

impl CacheEngine<FileStrategy> {
    pub fn file(config: FileConfig) -> Self {
        Self::new(FileStrategy::new(config))
    }

    pub fn file_with_codec(config: FileConfig, codec: Arc<dyn SnapshotCodec>) -> Self {
        Self::new(FileStrategy::with_codec(config, codec))
    }

    /// File backing `function`, once it has been registered.
    pub fn cache_path(&self, function: &FunctionKey) -> Option<PathBuf> {
        self.strategy().path_of(function)
    }

    pub fn phase(&self, function: &FunctionKey) -> Option<StorePhase> {
        self.state().slot(function).map(|slot| slot.lock().ext)
    }

    /// Stops flushing this handle when the process exits.
    pub fn cancel_exit_flush(&self) {
        exit::cancel_flush_at_exit(self);
    }
}
