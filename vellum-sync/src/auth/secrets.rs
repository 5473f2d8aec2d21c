//! Secure credential persistence.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Store for the secret half of persisted credentials.
///
/// `read_password` returns `Ok(None)` for a missing entry; only real store
/// failures surface as errors.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read_password(&self, service: &str, key: &str) -> SyncResult<Option<String>>;
    async fn write_password(&self, service: &str, key: &str, password: &str) -> SyncResult<()>;
    async fn delete_password(&self, service: &str, key: &str) -> SyncResult<()>;
}

/// In-memory [`SecretStore`] with read/write counters for tests.
#[derive(Default)]
pub struct MemorySecretStore {
    inner: RwLock<HashMap<(String, String), String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read_password` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write_password` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn read_password(&self, service: &str, key: &str) -> SyncResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().await;
        Ok(inner.get(&(service.to_string(), key.to_string())).cloned())
    }

    async fn write_password(&self, service: &str, key: &str, password: &str) -> SyncResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write().await;
        inner.insert(
            (service.to_string(), key.to_string()),
            password.to_string(),
        );
        Ok(())
    }

    async fn delete_password(&self, service: &str, key: &str) -> SyncResult<()> {
        let mut inner = self.inner.write().await;
        inner.remove(&(service.to_string(), key.to_string()));
        Ok(())
    }
}

/// [`SecretStore`] backed by the OS keyring.
///
/// The keyring API is blocking, so every call runs on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringSecretStore;

impl KeyringSecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn keyring_entry(service: &str, key: &str) -> SyncResult<keyring::Entry> {
    keyring::Entry::new(service, key)
        .map_err(|e| SyncError::Auth(format!("keyring entry failed: {e}")))
}

async fn run_blocking<T, F>(f: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> SyncResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Auth(format!("keyring task panicked: {e}")))?
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn read_password(&self, service: &str, key: &str) -> SyncResult<Option<String>> {
        let service = service.to_string();
        let key = key.to_string();
        run_blocking(move || {
            let entry = keyring_entry(&service, &key)?;
            match entry.get_password() {
                Ok(password) => Ok(Some(password)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(SyncError::Auth(format!("keyring read failed: {e}"))),
            }
        })
        .await
    }

    async fn write_password(&self, service: &str, key: &str, password: &str) -> SyncResult<()> {
        let service = service.to_string();
        let key = key.to_string();
        let password = password.to_string();
        run_blocking(move || {
            let entry = keyring_entry(&service, &key)?;
            entry
                .set_password(&password)
                .map_err(|e| SyncError::Auth(format!("keyring write failed: {e}")))
        })
        .await
    }

    async fn delete_password(&self, service: &str, key: &str) -> SyncResult<()> {
        let service = service.to_string();
        let key = key.to_string();
        run_blocking(move || {
            let entry = keyring_entry(&service, &key)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(SyncError::Auth(format!("keyring delete failed: {e}"))),
            }
        })
        .await
    }
}
