//! Storage abstraction for resumable state
//!
//! The core never talks to a concrete storage backend. Components that want
//! to survive a restart take an injected [`StateStore`] and treat every
//! failure as non-fatal: a load miss means in-memory defaults, a save error
//! is logged and dropped. [`MemoryStore`] backs tests, [`FileStore`] gives a
//! simple on-disk backend for long-running deployments.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

/// Errors from state persistence
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Minimal key-value persistence seam
///
/// Implementations must be safe to share across a stream's components.
pub trait StateStore: Send + Sync {
    /// Load the bytes saved under `key`, if any
    fn load(&self, key: &str) -> Option<Vec<u8>>;
    /// Save `bytes` under `key`, replacing any previous value
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral streams
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.lock() {
            Ok(map) => map.get(key).cloned(),
            Err(_) => None,
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if let Ok(mut map) = self.entries.lock() {
            map.insert(key.to_string(), bytes.to_vec());
        }
        Ok(())
    }
}

/// One-file-per-key store rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are dotted names like "greenhouse.water"; keep them readable
        // but never let one escape the root directory.
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Option<Vec<u8>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("failed to read state for {}: {}", key, e);
                None
            }
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::write(self.path_for(key), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load("missing"), None);
        store.save("k", b"payload").unwrap();
        assert_eq!(store.load("k"), Some(b"payload".to_vec()));
        store.save("k", b"replaced").unwrap();
        assert_eq!(store.load("k"), Some(b"replaced".to_vec()));
    }

    #[test]
    fn file_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        assert_eq!(store.load("greenhouse.water"), None);
        store.save("greenhouse.water", b"{\"cumulative\":2.0}").unwrap();
        assert_eq!(
            store.load("greenhouse.water"),
            Some(b"{\"cumulative\":2.0}".to_vec())
        );
    }

    #[test]
    fn hostile_keys_stay_inside_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        store.save("../escape/attempt", b"x").unwrap();
        // The file landed inside the root, under a sanitized name.
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
