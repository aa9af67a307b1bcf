use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Hash and modification time of one registered binding resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub hash: String,
    pub last_modified: Option<u64>,
}

/// Remembers which resource contents were already registered, so reloading an
/// unchanged resource is a no-op.
#[derive(Debug, Clone, Default)]
pub struct SourceCache {
    entries: HashMap<String, CacheEntry>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, uri: &str) -> Option<&CacheEntry> {
        self.entries.get(uri)
    }

    pub fn is_unchanged(&self, uri: &str, source: &str) -> bool {
        self.entries
            .get(uri)
            .map(|entry| entry.hash == Self::compute_hash(source))
            .unwrap_or(false)
    }

    pub fn set(&mut self, uri: &str, source: &str, last_modified: Option<u64>) {
        self.entries.insert(
            uri.to_string(),
            CacheEntry {
                hash: Self::compute_hash(source),
                last_modified,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
