//! Key-value conversation memory
//!
//! A [`MemoryStore`] is an explicit handle owned by whoever creates it.
//! Clones share the same entries; [`MemoryStore::new`] always starts empty.
//! Orchestrators decide the lifetime through [`crate::config::MemoryScope`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared in-memory key-value store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a single map call, so a poisoned lock still holds a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a value
    pub fn store(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        tracing::debug!(key = %key, "Memory entry stored");
        self.write().insert(key, value.into());
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether two handles point at the same entries
    pub fn shares_with(&self, other: &MemoryStore) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}
