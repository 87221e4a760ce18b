use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{CacheError, CacheResult};
use crate::key::FunctionKey;

pub const CACHE_DIR_ENV: &str = "FUNCACHE_DIR";
pub const DEFAULT_ROOT: &str = "resources/database/";

pub fn env_root() -> Option<PathBuf> {
    env::var_os(CACHE_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn user_cache_root() -> CacheResult<PathBuf> {
    let dirs = ProjectDirs::from("", "", "funcache")
        .ok_or_else(|| CacheError::Config("failed to determine user cache directory".into()))?;
    Ok(dirs.cache_dir().to_path_buf())
}

/// `{root}{function}{extension}`, with the key made file-name safe.
pub fn default_cache_path(root: &Path, function: &FunctionKey, extension: &str) -> PathBuf {
    root.join(format!("{}{}", function.file_stem(), extension))
}

pub fn ensure_parent(path: &Path) -> CacheResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|err| CacheError::io("create cache directory", parent, err)),
        _ => Ok(()),
    }
}
