//! In-memory session storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tilshare_core::auth::{SessionStorage, StorageError};

/// In-memory key/value store standing in for browser session storage.
///
/// Clones share the same map, so a "reloaded" controller built from a clone
/// sees what the previous one persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
    writes: Arc<RwLock<usize>>,
}

impl MemoryStorage {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Copy of every stored entry.
    pub async fn entries(&self) -> HashMap<String, String> {
        self.items.read().await.clone()
    }

    /// Number of `set_item` calls so far.
    pub async fn write_count(&self) -> usize {
        *self.writes.read().await
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.read().await;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().await;
        items.insert(key.to_string(), value.to_string());
        *self.writes.write().await += 1;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().await;
        items.remove(key);
        Ok(())
    }
}
