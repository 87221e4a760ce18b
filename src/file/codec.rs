use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;

/// Encoded entries of one sub-store, as they are persisted.
pub type Snapshot = AHashMap<CacheKey, Value>;

/// Byte format of persisted sub-stores.
pub trait SnapshotCodec: Send + Sync {
    /// Extension, including the dot, of default cache files.
    fn extension(&self) -> &str;

    fn encode(&self, entries: &Snapshot) -> CacheResult<Vec<u8>>;

    /// Fails with [`CacheError::Decode`] on malformed or non-mapping payloads.
    fn decode(&self, bytes: &[u8]) -> CacheResult<Snapshot>;
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    entries: Vec<(&'a CacheKey, &'a Value)>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotFile {
    entries: Vec<(CacheKey, Value)>,
}

/// `{"entries": [[key, value], ...]}`, sorted by key.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl SnapshotCodec for JsonCodec {
    fn extension(&self) -> &str {
        ".json"
    }

    fn encode(&self, entries: &Snapshot) -> CacheResult<Vec<u8>> {
        let mut sorted: Vec<_> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        serde_json::to_vec(&SnapshotRef { entries: sorted })
            .map_err(|err| CacheError::Encode(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<Snapshot> {
        let snapshot: SnapshotFile =
            serde_json::from_slice(bytes).map_err(|err| CacheError::Decode(err.to_string()))?;
        Ok(snapshot.entries.into_iter().collect())
    }
}
