//! Persisted per-scope sync positions.
//!
//! Each scope tracks the highest update sequence number it has fully
//! processed. The record survives restarts so the next run can resume as an
//! incremental download instead of refetching everything.

use crate::error::SyncResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use vellum_types::{Guid, SyncStateRecord};
use vellum_storage::StorageError;

/// One synchronization scope: the account's own data or a single linked
/// notebook shared into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncScope {
    Account,
    LinkedNotebook(Guid),
}

impl SyncScope {
    /// Directory-safe relative path for this scope, shared by the file
    /// state store and the download journal layout.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        match self {
            SyncScope::Account => PathBuf::from("account"),
            SyncScope::LinkedNotebook(guid) => Path::new("linked").join(guid.to_string()),
        }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncScope::Account => write!(f, "account"),
            SyncScope::LinkedNotebook(guid) => write!(f, "linked notebook {guid}"),
        }
    }
}

/// Persistence seam for [`SyncStateRecord`]s.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Returns the persisted record for `scope`, or `None` if the scope has
    /// never completed a sync.
    async fn get(&self, scope: &SyncScope) -> SyncResult<Option<SyncStateRecord>>;

    /// Replaces the persisted record for `scope`.
    async fn put(&self, scope: &SyncScope, record: SyncStateRecord) -> SyncResult<()>;

    /// Forgets the persisted record for `scope`. The next run for that scope
    /// starts from scratch.
    async fn clear(&self, scope: &SyncScope) -> SyncResult<()>;
}

/// File-backed store keeping one JSON document per scope under a root
/// directory: `account.json` and `linked/<guid>.json`.
pub struct FileSyncStateStore {
    root: PathBuf,
}

impl FileSyncStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, scope: &SyncScope) -> PathBuf {
        let mut path = self.root.join(scope.relative_path());
        path.set_extension("json");
        path
    }
}

#[async_trait]
impl SyncStateStore for FileSyncStateStore {
    async fn get(&self, scope: &SyncScope) -> SyncResult<Option<SyncStateRecord>> {
        let path = self.path_for(scope);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from(e).into()),
        };
        let record = serde_json::from_str(&text)?;
        Ok(Some(record))
    }

    async fn put(&self, scope: &SyncScope, record: SyncStateRecord) -> SyncResult<()> {
        let path = self.path_for(scope);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(StorageError::from)?;
        }
        let text = serde_json::to_string_pretty(&record)?;
        fs::write(&path, text).await.map_err(StorageError::from)?;
        debug!(
            "Saved sync state for {}: usn {}",
            scope, record.last_sync_usn
        );
        Ok(())
    }

    async fn clear(&self, scope: &SyncScope) -> SyncResult<()> {
        let path = self.path_for(scope);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemorySyncStateStore {
    records: RwLock<HashMap<SyncScope, SyncStateRecord>>,
}

impl MemorySyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStateStore for MemorySyncStateStore {
    async fn get(&self, scope: &SyncScope) -> SyncResult<Option<SyncStateRecord>> {
        Ok(self.records.read().await.get(scope).copied())
    }

    async fn put(&self, scope: &SyncScope, record: SyncStateRecord) -> SyncResult<()> {
        self.records.write().await.insert(*scope, record);
        Ok(())
    }

    async fn clear(&self, scope: &SyncScope) -> SyncResult<()> {
        self.records.write().await.remove(scope);
        Ok(())
    }
}
