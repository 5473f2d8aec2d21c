//! Non-secret settings persistence.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Key-value store for the non-secret half of persisted credentials.
///
/// `keys` must enumerate every stored key so persisted entries stay
/// discoverable across restarts; cache clearing depends on it.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> SyncResult<()>;
    async fn remove(&self, key: &str) -> SyncResult<()>;
    async fn keys(&self) -> SyncResult<Vec<String>>;
}

/// In-memory [`SettingsStore`].
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: RwLock<HashMap<String, Value>>,
}

impl MemorySettingsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> SyncResult<Vec<String>> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }
}
