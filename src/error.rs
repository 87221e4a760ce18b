use std::path::{Path, PathBuf};

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("function `{0}` is not registered with this cache")]
    UnknownFunction(String),

    #[error("cache state is shared with workers and cannot be re-initialised")]
    AlreadyShared,

    #[error("failed to {action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode cache snapshot: {0}")]
    Encode(String),

    #[error("failed to decode cache snapshot: {0}")]
    Decode(String),

    #[error("worker pool error: {0}")]
    Broker(String),

    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Malformed snapshots degrade to an empty store instead of failing.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_mentions_path() {
        let err = CacheError::io(
            "read",
            Path::new("resources/database/square.json"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert_eq!(
            err.to_string(),
            "failed to read resources/database/square.json"
        );
        assert!(!err.is_decode());
    }

    #[test]
    fn decode_errors_are_recognised() {
        assert!(CacheError::Decode("expected map".into()).is_decode());
    }
}
