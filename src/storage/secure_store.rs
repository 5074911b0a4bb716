//! # Key-Value Storage
//!
//! Local storage for the identity secret key, namespaced by username.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      KEY-VALUE STORAGE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  KeyValueStore trait                                                   │
//! │  ───────────────────                                                    │
//! │  • get(key)            - Read a value (zeroized on drop)               │
//! │  • set(key, value)     - Insert or overwrite                           │
//! │  • remove(key)         - Delete, reports whether it existed            │
//! │  • contains(key)       - Existence check                               │
//! │                                                                         │
//! │  ┌───────────────────────┐   ┌───────────────────────────────┐         │
//! │  │ MemoryKeyValueStore   │   │ FileKeyValueStore             │         │
//! │  │                       │   │                               │         │
//! │  │ - Process lifetime    │   │ - JSON map on disk            │         │
//! │  │ - Tests, ephemeral    │   │ - Atomic rewrite (tmp+rename) │         │
//! │  │   sessions            │   │ - Loaded once on open         │         │
//! │  └───────────────────────┘   └───────────────────────────────┘         │
//! │                                                                         │
//! │  Physical key layout: user_{username}_{logical_key}                    │
//! │  Values are base64 text, so a file store stays human-inspectable.      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Logical key names, combined with a username via [`user_key`]
pub mod keys {
    /// The user's Kyber-768 secret key
    pub const KYBER_PRIVATE_KEY: &str = "kyber_private_key";
}

/// Build the physical storage key for `username`
pub fn user_key(username: &str, key: &str) -> String {
    format!("user_{}_{}", username, key)
}

/// Local key-value storage
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>>;

    /// Insert or overwrite a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value, returning whether it existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// Check if a key exists
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Process-lifetime store
#[derive(Default)]
pub struct MemoryKeyValueStore {
    memory: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl MemoryKeyValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        Ok(self.memory.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.memory
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.memory.write().remove(key).is_some())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.memory.read().contains_key(key))
    }
}

// ============================================================================
// FILE-BACKED STORE
// ============================================================================

/// Store persisted as a single JSON object on disk
///
/// The whole map is rewritten on every change: written to `<path>.json.tmp`,
/// then renamed over the original.
pub struct FileKeyValueStore {
    path: PathBuf,
    memory: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl FileKeyValueStore {
    /// Open the store at `path`, loading existing contents if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let memory = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let entries: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
                Error::StorageReadError(format!("{} is not a valid store: {}", path.display(), e))
            })?;
            tracing::debug!(path = %path.display(), entries = entries.len(), "Loaded key-value store");
            entries
                .into_iter()
                .map(|(k, v)| (k, Zeroizing::new(v)))
                .collect()
        } else {
            tracing::debug!(path = %path.display(), "No existing key-value store, starting fresh");
            HashMap::new()
        };

        Ok(Self {
            path,
            memory: RwLock::new(memory),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, Zeroizing<String>>) -> Result<()> {
        let plain: HashMap<&str, &str> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let json = Zeroizing::new(serde_json::to_string_pretty(&plain)?);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::StorageWriteError(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())
            .map_err(|e| Error::StorageWriteError(format!("write {}: {}", tmp_path.display(), e)))?;

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(Error::StorageWriteError(format!(
                "rename to {}: {}",
                self.path.display(),
                e
            )));
        }

        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        Ok(self.memory.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut memory = self.memory.write();
        let previous = memory.insert(key.to_string(), Zeroizing::new(value.to_string()));

        if let Err(e) = self.persist(&memory) {
            match previous {
                Some(old) => memory.insert(key.to_string(), old),
                None => memory.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut memory = self.memory.write();
        let Some(previous) = memory.remove(key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&memory) {
            memory.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.memory.read().contains_key(key))
    }
}

// ============================================================================
// TESTS
// ============================================================================
