use std::path::PathBuf;

use serde::Deserialize;

use crate::error::CacheResult;
use crate::file::path;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Capacity of functions wrapped without an explicit one.
    pub default_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Directory holding default cache files.
    pub root: PathBuf,
    /// Extension of default cache files; the codec's when unset.
    pub extension: Option<String>,
    /// Flush every store when the process exits.
    pub flush_on_exit: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(path::DEFAULT_ROOT),
            extension: None,
            flush_on_exit: true,
        }
    }
}

impl FileConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Defaults, with the root taken from `FUNCACHE_DIR` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = path::env_root() {
            config.root = root;
        }
        config
    }

    /// Defaults rooted in the per-user cache directory.
    pub fn in_user_cache() -> CacheResult<Self> {
        Ok(Self::with_root(path::user_cache_root()?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory: MemoryConfig,
    pub file: FileConfig,
}

#[cfg(feature = "toml-config")]
impl CacheConfig {
    pub fn from_toml_str(source: &str) -> CacheResult<Self> {
        toml::from_str(source).map_err(|err| crate::error::CacheError::Config(err.to_string()))
    }

    pub fn load(path: &std::path::Path) -> CacheResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|err| crate::error::CacheError::io("read", path, err))?;
        Self::from_toml_str(&source)
    }
}
