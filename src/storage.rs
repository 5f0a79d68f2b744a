//! Key-value stores backing the run repository.
//!
//! Each store holds whole serialized collections under a small set of keys
//! and enforces an optional byte quota. Usage is counted as key bytes plus
//! value bytes for every entry.

use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// A string key-value store with an optional byte quota.
pub trait KeyValueStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value under `key`. Fails with [`StoreError::QuotaExceeded`]
    /// without modifying the store if the new value does not fit.
    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    /// Total byte quota, if the store enforces one.
    fn quota_bytes(&self) -> Option<usize>;

    /// Bytes currently used by all entries.
    fn used_bytes(&self) -> usize;

    /// Bytes used by the entry under `key` (0 if absent).
    fn entry_bytes(&self, key: &str) -> usize;

    /// Bytes used by every entry except `key`.
    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.used_bytes().saturating_sub(self.entry_bytes(key))
    }
}

fn check_quota(quota: Option<usize>, others: usize, key: &str, value: &str) -> Result<(), StoreError> {
    let requested = key.len() + value.len();
    match quota {
        Some(quota) if others + requested > quota => Err(StoreError::QuotaExceeded {
            requested,
            available: quota.saturating_sub(others),
        }),
        _ => Ok(()),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store, mainly for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self { entries: HashMap::new(), quota: Some(quota_bytes) }
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        check_quota(self.quota, self.used_bytes_excluding(key), key, value)?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn quota_bytes(&self) -> Option<usize> {
        self.quota
    }

    fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn entry_bytes(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |v| key.len() + v.len())
    }
}

// ============================================================================
// File store
// ============================================================================

/// Directory-backed store: one `{key}.json` file per key.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// failed write never leaves a truncated entry behind.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    quota: Option<usize>,
    sizes: HashMap<String, usize>,
}

const FILE_EXTENSION: &str = "json";

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, quota_bytes: Option<usize>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut sizes = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(key).is_ok() {
                    let len = fs::metadata(&path)?.len() as usize;
                    sizes.insert(key.to_string(), key.len() + len);
                }
            }
        }

        debug!("[FileStore] Opened {:?} with {} entries", dir, sizes.len());
        Ok(Self { dir, quota: quota_bytes, sizes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, FILE_EXTENSION))
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        check_quota(self.quota, self.used_bytes_excluding(key), key, value)?;

        let target = self.path_for(key);
        let tmp = target.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        self.sizes.insert(key.to_string(), key.len() + value.len());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.sizes.remove(key);
        Ok(())
    }

    fn quota_bytes(&self) -> Option<usize> {
        self.quota
    }

    fn used_bytes(&self) -> usize {
        self.sizes.values().sum()
    }

    fn entry_bytes(&self, key: &str) -> usize {
        self.sizes.get(key).copied().unwrap_or(0)
    }
}
