//! Durable per-item download journal.
//!
//! Every note and resource outcome is recorded here before it is reported
//! onward, so a crashed or cancelled run can resume without refetching what
//! already landed. The layout is one small file per item under the journal
//! root:
//!
//! ```text
//! <root>/<kind>/processed/<guid>.json          journaled usn
//! <root>/<kind>/failed_download/<guid>.json    item plus error
//! <root>/<kind>/failed_process/<guid>.json     item plus error
//! <root>/<kind>/cancelled/<guid>.json          item
//! <root>/<kind>/expunged/<guid>.json           marker
//! <root>/<kind>/failed_expunge/<guid>.json     error
//! ```
//!
//! A guid lives in at most one of the first four categories; recording an
//! outcome removes the guid's files from the others.

use crate::error::{SyncError, SyncResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;
use vellum_types::{Guid, Usn};

const PROCESSED: &str = "processed";
const FAILED_DOWNLOAD: &str = "failed_download";
const FAILED_PROCESS: &str = "failed_process";
const CANCELLED: &str = "cancelled";
const EXPUNGED: &str = "expunged";
const FAILED_EXPUNGE: &str = "failed_expunge";

#[derive(Debug, Serialize, serde::Deserialize)]
struct FailureRecord<I> {
    item: I,
    error: String,
}

/// File-backed journal for one sync scope.
pub struct DownloadJournal {
    root: PathBuf,
    // Outcome transitions touch several files; the lock keeps them atomic
    // with respect to each other and to readers.
    lock: Mutex<()>,
}

impl DownloadJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    // ── Recording outcomes ───────────────────────────────────────

    /// Records that an item was fully downloaded and stored under `usn`.
    pub async fn record_processed(&self, kind: &str, guid: &Guid, usn: Usn) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        self.remove_other_outcomes(kind, guid, PROCESSED).await?;
        self.write_json(&self.entry_path(kind, PROCESSED, guid), &usn)
            .await
    }

    pub async fn record_failed_download<I: Serialize>(
        &self,
        kind: &str,
        guid: &Guid,
        item: &I,
        error: &str,
    ) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        self.remove_other_outcomes(kind, guid, FAILED_DOWNLOAD)
            .await?;
        let record = FailureRecord {
            item,
            error: error.to_string(),
        };
        self.write_json(&self.entry_path(kind, FAILED_DOWNLOAD, guid), &record)
            .await
    }

    pub async fn record_failed_process<I: Serialize>(
        &self,
        kind: &str,
        guid: &Guid,
        item: &I,
        error: &str,
    ) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        self.remove_other_outcomes(kind, guid, FAILED_PROCESS)
            .await?;
        let record = FailureRecord {
            item,
            error: error.to_string(),
        };
        self.write_json(&self.entry_path(kind, FAILED_PROCESS, guid), &record)
            .await
    }

    pub async fn record_cancelled<I: Serialize>(
        &self,
        kind: &str,
        guid: &Guid,
        item: &I,
    ) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        self.remove_other_outcomes(kind, guid, CANCELLED).await?;
        self.write_json(&self.entry_path(kind, CANCELLED, guid), item)
            .await
    }

    pub async fn record_expunged(&self, kind: &str, guid: &Guid) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        let path = self.entry_path(kind, EXPUNGED, guid);
        self.remove_entry(&self.entry_path(kind, FAILED_EXPUNGE, guid))
            .await?;
        self.write_json(&path, &()).await
    }

    pub async fn record_failed_expunge(
        &self,
        kind: &str,
        guid: &Guid,
        error: &str,
    ) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        self.write_json(&self.entry_path(kind, FAILED_EXPUNGE, guid), &error)
            .await
    }

    // ── Reading back ─────────────────────────────────────────────

    /// Items fully processed by earlier runs, with the usn each was
    /// journaled under.
    pub async fn processed_usns(&self, kind: &str) -> SyncResult<HashMap<Guid, Usn>> {
        let _guard = self.lock.lock().await;
        let mut usns = HashMap::new();
        for (guid, text) in self.read_category(kind, PROCESSED).await? {
            match serde_json::from_str(&text) {
                Ok(usn) => {
                    usns.insert(guid, usn);
                }
                Err(e) => warn!("Discarding malformed journal entry for {}: {}", guid, e),
            }
        }
        Ok(usns)
    }

    /// Guids already expunged by earlier runs.
    pub async fn expunged_guids(&self, kind: &str) -> SyncResult<HashSet<Guid>> {
        let _guard = self.lock.lock().await;
        let entries = self.read_category(kind, EXPUNGED).await?;
        Ok(entries.into_iter().map(|(guid, _)| guid).collect())
    }

    /// Items an earlier run failed on or abandoned, due for a retry before
    /// anything new is attempted.
    pub async fn pending_items<I: DeserializeOwned>(&self, kind: &str) -> SyncResult<Vec<I>> {
        let _guard = self.lock.lock().await;
        let mut items = Vec::new();
        for category in [FAILED_DOWNLOAD, FAILED_PROCESS] {
            for (guid, text) in self.read_category(kind, category).await? {
                match serde_json::from_str::<FailureRecord<I>>(&text) {
                    Ok(record) => items.push(record.item),
                    Err(e) => warn!("Discarding malformed journal entry for {}: {}", guid, e),
                }
            }
        }
        for (guid, text) in self.read_category(kind, CANCELLED).await? {
            match serde_json::from_str(&text) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Discarding malformed journal entry for {}: {}", guid, e),
            }
        }
        Ok(items)
    }

    /// Guids an earlier run failed to expunge.
    pub async fn pending_expunges(&self, kind: &str) -> SyncResult<Vec<Guid>> {
        let _guard = self.lock.lock().await;
        let entries = self.read_category(kind, FAILED_EXPUNGE).await?;
        Ok(entries.into_iter().map(|(guid, _)| guid).collect())
    }

    /// Drops the whole journal. A full download starting over has no use
    /// for the previous run's outcomes.
    pub async fn clear(&self) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(journal_error(&self.root, e)),
        }
    }

    // ── File plumbing ────────────────────────────────────────────

    fn entry_path(&self, kind: &str, category: &str, guid: &Guid) -> PathBuf {
        self.root
            .join(kind)
            .join(category)
            .join(format!("{guid}.json"))
    }

    async fn remove_other_outcomes(
        &self,
        kind: &str,
        guid: &Guid,
        keep_category: &str,
    ) -> SyncResult<()> {
        for category in [PROCESSED, FAILED_DOWNLOAD, FAILED_PROCESS, CANCELLED] {
            if category == keep_category {
                continue;
            }
            self.remove_entry(&self.entry_path(kind, category, guid))
                .await?;
        }
        Ok(())
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| journal_error(parent, e))?;
        }
        let text = serde_json::to_string(value)?;
        fs::write(path, text)
            .await
            .map_err(|e| journal_error(path, e))
    }

    async fn remove_entry(&self, path: &Path) -> SyncResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(journal_error(path, e)),
        }
    }

    /// Reads every entry of one category as `(guid, raw JSON)` pairs.
    /// Files whose names do not parse as guids are skipped.
    async fn read_category(&self, kind: &str, category: &str) -> SyncResult<Vec<(Guid, String)>> {
        let dir = self.root.join(kind).join(category);
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(journal_error(&dir, e)),
        };
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| journal_error(&dir, e))?
        {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(guid) = Guid::parse(stem) else {
                warn!("Skipping foreign file in journal: {}", path.display());
                continue;
            };
            let text = fs::read_to_string(&path)
                .await
                .map_err(|e| journal_error(&path, e))?;
            entries.push((guid, text));
        }
        Ok(entries)
    }
}

fn journal_error(path: &Path, e: std::io::Error) -> SyncError {
    SyncError::Journal(format!("{}: {e}", path.display()))
}
