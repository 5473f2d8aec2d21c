//! Direct application of metadata kinds out of sync chunks.
//!
//! Notebooks, tags, saved searches and linked notebooks carry everything
//! they need inside the chunk, so they are written to local storage as they
//! are walked, chunk by chunk in download order.

use crate::cancel::CancellationToken;
use crate::error::SyncResult;
use crate::status::MetadataCounters;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_storage::{LocalStorage, StorageResult};
use vellum_types::{Guid, LinkedNotebook, Notebook, SavedSearch, SyncChunk, Tag};

/// A metadata kind that can be applied straight out of a chunk.
#[async_trait]
pub trait MetadataEntity: Clone + Send + Sync + 'static {
    /// Human-readable plural, used in logs and progress reporting.
    const NAME: &'static str;

    fn from_chunk(chunk: &SyncChunk) -> &[Self];

    fn expunged_from_chunk(chunk: &SyncChunk) -> &[Guid];

    fn guid(&self) -> Option<Guid>;

    async fn find(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<Option<Self>>;

    async fn put(storage: &dyn LocalStorage, entity: Self) -> StorageResult<()>;

    async fn expunge(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<()>;

    /// Carries the existing row's local identity (local id, favorited flag)
    /// onto the fresh server copy so storage updates in place.
    fn adopt_local_identity(&mut self, _existing: &Self) {}

    /// Clears the local-modification flag; a server copy is clean by
    /// definition.
    fn mark_clean(&mut self) {}
}

#[async_trait]
impl MetadataEntity for Notebook {
    const NAME: &'static str = "notebooks";

    fn from_chunk(chunk: &SyncChunk) -> &[Self] {
        &chunk.notebooks
    }

    fn expunged_from_chunk(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_notebooks
    }

    fn guid(&self) -> Option<Guid> {
        self.guid
    }

    async fn find(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<Option<Self>> {
        storage.find_notebook_by_guid(guid).await
    }

    async fn put(storage: &dyn LocalStorage, entity: Self) -> StorageResult<()> {
        storage.put_notebook(entity).await
    }

    async fn expunge(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<()> {
        storage.expunge_notebook_by_guid(guid).await
    }

    fn adopt_local_identity(&mut self, existing: &Self) {
        self.local_id = existing.local_id;
        self.locally_favorited = existing.locally_favorited;
    }

    fn mark_clean(&mut self) {
        self.locally_modified = false;
    }
}

#[async_trait]
impl MetadataEntity for Tag {
    const NAME: &'static str = "tags";

    fn from_chunk(chunk: &SyncChunk) -> &[Self] {
        &chunk.tags
    }

    fn expunged_from_chunk(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_tags
    }

    fn guid(&self) -> Option<Guid> {
        self.guid
    }

    async fn find(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<Option<Self>> {
        storage.find_tag_by_guid(guid).await
    }

    async fn put(storage: &dyn LocalStorage, entity: Self) -> StorageResult<()> {
        storage.put_tag(entity).await
    }

    async fn expunge(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<()> {
        storage.expunge_tag_by_guid(guid).await
    }

    fn adopt_local_identity(&mut self, existing: &Self) {
        self.local_id = existing.local_id;
        self.locally_favorited = existing.locally_favorited;
        // The local parent linkage survives only while the server-side
        // parent is unchanged.
        if self.parent_guid == existing.parent_guid {
            self.parent_local_id = existing.parent_local_id;
        }
    }

    fn mark_clean(&mut self) {
        self.locally_modified = false;
    }
}

#[async_trait]
impl MetadataEntity for SavedSearch {
    const NAME: &'static str = "saved searches";

    fn from_chunk(chunk: &SyncChunk) -> &[Self] {
        &chunk.searches
    }

    fn expunged_from_chunk(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_searches
    }

    fn guid(&self) -> Option<Guid> {
        self.guid
    }

    async fn find(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<Option<Self>> {
        storage.find_saved_search_by_guid(guid).await
    }

    async fn put(storage: &dyn LocalStorage, entity: Self) -> StorageResult<()> {
        storage.put_saved_search(entity).await
    }

    async fn expunge(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<()> {
        storage.expunge_saved_search_by_guid(guid).await
    }

    fn adopt_local_identity(&mut self, existing: &Self) {
        self.local_id = existing.local_id;
        self.locally_favorited = existing.locally_favorited;
    }

    fn mark_clean(&mut self) {
        self.locally_modified = false;
    }
}

#[async_trait]
impl MetadataEntity for LinkedNotebook {
    const NAME: &'static str = "linked notebooks";

    fn from_chunk(chunk: &SyncChunk) -> &[Self] {
        &chunk.linked_notebooks
    }

    fn expunged_from_chunk(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_linked_notebooks
    }

    fn guid(&self) -> Option<Guid> {
        self.guid
    }

    async fn find(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<Option<Self>> {
        storage.find_linked_notebook_by_guid(guid).await
    }

    async fn put(storage: &dyn LocalStorage, entity: Self) -> StorageResult<()> {
        storage.put_linked_notebook(entity).await
    }

    async fn expunge(storage: &dyn LocalStorage, guid: &Guid) -> StorageResult<()> {
        storage.expunge_linked_notebook_by_guid(guid).await
    }
}

/// Applies metadata kinds from downloaded chunks to local storage.
///
/// Individual failures are counted, logged and skipped; one broken entity
/// never blocks the rest of the download.
pub struct MetadataProcessor {
    storage: Arc<dyn LocalStorage>,
}

impl MetadataProcessor {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    /// Applies one metadata kind across `chunks`, in chunk order.
    ///
    /// Returns the partial counters when cancelled mid-way; the caller
    /// checks the token to tell a cancelled run from a finished one.
    pub async fn process<E: MetadataEntity>(
        &self,
        chunks: &[SyncChunk],
        cancel: &CancellationToken,
        progress: &(dyn Fn(&MetadataCounters) + Send + Sync),
    ) -> SyncResult<MetadataCounters> {
        let mut counters = MetadataCounters::default();
        for chunk in chunks {
            counters.total += E::from_chunk(chunk).len();
            counters.total_expunged += E::expunged_from_chunk(chunk).len();
        }

        for chunk in chunks {
            for entity in E::from_chunk(chunk) {
                if cancel.is_cancelled() {
                    return Ok(counters);
                }
                let Some(guid) = entity.guid() else {
                    warn!("Skipping a chunk entry of {} without guid", E::NAME);
                    counters.failed += 1;
                    continue;
                };
                let mut incoming = entity.clone();
                incoming.mark_clean();
                match E::find(self.storage.as_ref(), &guid).await {
                    Ok(Some(existing)) => {
                        incoming.adopt_local_identity(&existing);
                        match E::put(self.storage.as_ref(), incoming).await {
                            Ok(()) => counters.updated += 1,
                            Err(e) => {
                                warn!("Failed to update one of {}: {}", E::NAME, e);
                                counters.failed += 1;
                            }
                        }
                    }
                    Ok(None) => match E::put(self.storage.as_ref(), incoming).await {
                        Ok(()) => counters.added += 1,
                        Err(e) => {
                            warn!("Failed to add one of {}: {}", E::NAME, e);
                            counters.failed += 1;
                        }
                    },
                    Err(e) => {
                        warn!("Failed to look up one of {}: {}", E::NAME, e);
                        counters.failed += 1;
                    }
                }
                progress(&counters);
            }

            for guid in E::expunged_from_chunk(chunk) {
                if cancel.is_cancelled() {
                    return Ok(counters);
                }
                match E::expunge(self.storage.as_ref(), guid).await {
                    Ok(()) => counters.expunged += 1,
                    Err(e) => {
                        warn!("Failed to expunge one of {}: {}", E::NAME, e);
                        counters.failed_to_expunge += 1;
                    }
                }
                progress(&counters);
            }
        }

        debug!(
            "Applied {}: {} added, {} updated, {} expunged, {} failed",
            E::NAME,
            counters.added,
            counters.updated,
            counters.expunged,
            counters.failed
        );
        Ok(counters)
    }
}
