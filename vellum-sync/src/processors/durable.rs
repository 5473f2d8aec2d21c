//! Journaling wrapper around an item processor.

use crate::cancel::CancellationToken;
use crate::error::SyncResult;
use crate::journal::DownloadJournal;
use crate::processors::{DownloadCallback, DownloadItem, ItemProcessor};
use crate::status::DownloadStatus;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_types::{AuthenticationInfo, Guid, SyncChunk, Usn};

/// Wraps an [`ItemProcessor`] so every per-item outcome lands in the
/// journal before it is reported onward.
///
/// On a resumed run the journal shapes the work list three ways: items
/// whose journaled usn is already at or past the incoming one are skipped,
/// items a previous run failed on or abandoned are retried before anything
/// new, and expunges already applied are not repeated. When the same guid
/// appears both as a journal leftover and in the incoming chunks, the
/// incoming copy wins; it is the newer one.
pub struct DurableProcessor<I: DownloadItem> {
    inner: Arc<dyn ItemProcessor<I>>,
    journal: Arc<DownloadJournal>,
}

impl<I: DownloadItem> DurableProcessor<I> {
    pub fn new(inner: Arc<dyn ItemProcessor<I>>, journal: Arc<DownloadJournal>) -> Self {
        Self { inner, journal }
    }

    /// Extracts this kind's work from `chunks` and processes it durably.
    pub async fn process_chunks(
        &self,
        chunks: &[SyncChunk],
        auth: &AuthenticationInfo,
        cancel: &CancellationToken,
        callback: &dyn DownloadCallback<I>,
    ) -> SyncResult<DownloadStatus<I>> {
        let (incoming, expunged) = self.inner.extract(chunks);

        let processed = self.journal.processed_usns(I::KIND).await?;
        let already_expunged = self.journal.expunged_guids(I::KIND).await?;
        let pending: Vec<I> = self.journal.pending_items(I::KIND).await?;

        let incoming_guids: HashSet<Guid> =
            incoming.iter().filter_map(DownloadItem::guid).collect();
        let retries: Vec<I> = pending
            .into_iter()
            .filter(|item| {
                item.guid()
                    .is_some_and(|guid| !incoming_guids.contains(&guid))
            })
            .collect();

        let todo: Vec<I> = incoming
            .into_iter()
            .filter(|item| {
                let Some(guid) = item.guid() else {
                    return false;
                };
                match (processed.get(&guid), item.usn()) {
                    // Already journaled at this usn or newer.
                    (Some(done), Some(usn)) => *done < usn,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
            })
            .collect();

        let mut seen = HashSet::new();
        let mut expunges: Vec<Guid> = Vec::new();
        for guid in self.journal.pending_expunges(I::KIND).await? {
            if seen.insert(guid) {
                expunges.push(guid);
            }
        }
        for guid in expunged {
            if !already_expunged.contains(&guid) && seen.insert(guid) {
                expunges.push(guid);
            }
        }

        callback
            .on_total_computed(retries.len() + todo.len(), expunges.len())
            .await;
        let journaling = JournalingCallback {
            journal: &self.journal,
            inner: callback,
        };

        let mut status = DownloadStatus::default();
        if !retries.is_empty() {
            debug!("Retrying {} {} from the journal", retries.len(), I::KIND);
            let retry_status = self
                .inner
                .process(retries, Vec::new(), auth, cancel, &journaling)
                .await?;
            status.merge(retry_status);
        }
        let main_status = self
            .inner
            .process(todo, expunges, auth, cancel, &journaling)
            .await?;
        status.merge(main_status);
        Ok(status)
    }
}

/// Journal writes happen here, after the item's outcome is decided and
/// before the downstream callback learns of it. A journal write failure is
/// logged and swallowed; losing resumability is better than losing the
/// download.
struct JournalingCallback<'a, I> {
    journal: &'a DownloadJournal,
    inner: &'a dyn DownloadCallback<I>,
}

#[async_trait]
impl<I: DownloadItem> DownloadCallback<I> for JournalingCallback<'_, I> {
    async fn on_total_computed(&self, _to_download: usize, _to_expunge: usize) {
        // The wrapper reported combined totals already; the per-pass totals
        // of the inner processor would double count.
    }

    async fn on_processed(&self, item: &I, usn: Usn) {
        if let Some(guid) = item.guid() {
            if let Err(e) = self.journal.record_processed(I::KIND, &guid, usn).await {
                warn!("Failed to journal a processed item: {}", e);
            }
        }
        self.inner.on_processed(item, usn).await;
    }

    async fn on_failed_to_download(&self, item: &I, error: &str) {
        if let Some(guid) = item.guid() {
            if let Err(e) = self
                .journal
                .record_failed_download(I::KIND, &guid, item, error)
                .await
            {
                warn!("Failed to journal a download failure: {}", e);
            }
        }
        self.inner.on_failed_to_download(item, error).await;
    }

    async fn on_failed_to_process(&self, item: &I, error: &str) {
        if let Some(guid) = item.guid() {
            if let Err(e) = self
                .journal
                .record_failed_process(I::KIND, &guid, item, error)
                .await
            {
                warn!("Failed to journal a processing failure: {}", e);
            }
        }
        self.inner.on_failed_to_process(item, error).await;
    }

    async fn on_cancelled(&self, item: &I) {
        if let Some(guid) = item.guid() {
            if let Err(e) = self.journal.record_cancelled(I::KIND, &guid, item).await {
                warn!("Failed to journal a cancelled item: {}", e);
            }
        }
        self.inner.on_cancelled(item).await;
    }

    async fn on_expunged(&self, guid: &Guid) {
        if let Err(e) = self.journal.record_expunged(I::KIND, guid).await {
            warn!("Failed to journal an expunged item: {}", e);
        }
        self.inner.on_expunged(guid).await;
    }

    async fn on_failed_to_expunge(&self, guid: &Guid, error: &str) {
        if let Err(e) = self
            .journal
            .record_failed_expunge(I::KIND, guid, error)
            .await
        {
            warn!("Failed to journal an expunge failure: {}", e);
        }
        self.inner.on_failed_to_expunge(guid, error).await;
    }
}
