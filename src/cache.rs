//! Local key-value cache persisted as a JSON file.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// String key to serialized text, mirrored to disk on every write.
#[derive(Clone)]
pub struct LocalCache {
    path: Option<PathBuf>,
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl LocalCache {
    /// Open a file-backed cache. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| match serde_json::from_str(&content) {
                Ok(entries) => Some(entries),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache file");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            path: Some(path),
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Cache that lives only in memory (for testing).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    /// Set a value.
    pub fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    /// Remove a value.
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = LocalCache::open(&path);
        cache.set("userProfile:u1", "{}".to_string()).unwrap();
        cache.set("userProfile:u2", "[]".to_string()).unwrap();
        cache.remove("userProfile:u2").unwrap();

        let reopened = LocalCache::open(&path);
        assert_eq!(reopened.get("userProfile:u1").as_deref(), Some("{}"));
        assert!(reopened.get("userProfile:u2").is_none());
    }
}
