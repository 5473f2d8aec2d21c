//! Paginated retrieval of sync chunks.

use crate::cancel::CancellationToken;
use crate::client::NoteStoreClient;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tracing::debug;
use vellum_types::{
    AuthenticationInfo, LinkedNotebook, ServerSyncState, SyncChunk, SyncChunkFilter, Usn,
};

/// Invoked after each chunk lands, with the chunk's high water mark and the
/// server's current update count.
pub trait ChunkProgress: Send + Sync {
    fn on_chunk(&self, highest: Usn, server: Usn);
}

/// Progress sink that drops everything.
pub struct NoProgress;

impl ChunkProgress for NoProgress {
    fn on_chunk(&self, _highest: Usn, _server: Usn) {}
}

enum ChunkSource<'a> {
    Account(&'a SyncChunkFilter),
    LinkedNotebook {
        linked_notebook: &'a LinkedNotebook,
        full_sync_only: bool,
    },
}

/// Downloads a scope's chunks one page at a time until the server's update
/// count is reached.
///
/// Every page must advance the watermark. A chunk whose high water mark is
/// at or below the cursor would loop forever, so it is reported as a
/// conflict and the download aborts.
pub struct SyncChunksDownloader {
    client: Arc<dyn NoteStoreClient>,
    max_entries: u32,
}

impl SyncChunksDownloader {
    pub fn new(client: Arc<dyn NoteStoreClient>, max_entries: u32) -> Self {
        Self {
            client,
            max_entries,
        }
    }

    /// Downloads the account scope's chunks covering mutations strictly
    /// after `after_usn`.
    pub async fn download_account_chunks(
        &self,
        after_usn: Usn,
        server_state: &ServerSyncState,
        filter: &SyncChunkFilter,
        auth: &AuthenticationInfo,
        cancel: &CancellationToken,
        progress: &dyn ChunkProgress,
    ) -> SyncResult<Vec<SyncChunk>> {
        self.download(
            ChunkSource::Account(filter),
            after_usn,
            server_state,
            auth,
            cancel,
            progress,
        )
        .await
    }

    /// Downloads one linked notebook scope's chunks covering mutations
    /// strictly after `after_usn`.
    pub async fn download_linked_notebook_chunks(
        &self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        full_sync_only: bool,
        server_state: &ServerSyncState,
        auth: &AuthenticationInfo,
        cancel: &CancellationToken,
        progress: &dyn ChunkProgress,
    ) -> SyncResult<Vec<SyncChunk>> {
        self.download(
            ChunkSource::LinkedNotebook {
                linked_notebook,
                full_sync_only,
            },
            after_usn,
            server_state,
            auth,
            cancel,
            progress,
        )
        .await
    }

    async fn download(
        &self,
        source: ChunkSource<'_>,
        after_usn: Usn,
        server_state: &ServerSyncState,
        auth: &AuthenticationInfo,
        cancel: &CancellationToken,
        progress: &dyn ChunkProgress,
    ) -> SyncResult<Vec<SyncChunk>> {
        let mut cursor = after_usn;
        // The server's update count can advance while pages are in flight;
        // each chunk reports the freshest value, so the target follows it.
        let mut target = server_state.update_count;
        let mut chunks = Vec::new();

        while cursor < target {
            cancel.check()?;
            let chunk = match &source {
                ChunkSource::Account(filter) => {
                    self.client
                        .sync_chunk(cursor, self.max_entries, filter, auth)
                        .await?
                }
                ChunkSource::LinkedNotebook {
                    linked_notebook,
                    full_sync_only,
                } => {
                    self.client
                        .linked_notebook_sync_chunk(
                            linked_notebook,
                            cursor,
                            self.max_entries,
                            *full_sync_only,
                            auth,
                        )
                        .await?
                }
            };
            let Some(high) = chunk.chunk_high_usn else {
                // Nothing past the cursor after all.
                break;
            };
            if high <= cursor {
                return Err(SyncError::Conflict(format!(
                    "sync chunk watermark went backwards: {high} after {cursor}"
                )));
            }
            target = chunk.update_count;
            cursor = high;
            chunks.push(chunk);
            debug!("Downloaded sync chunk up to usn {} of {}", high, target);
            progress.on_chunk(high, target);
        }

        Ok(chunks)
    }
}
