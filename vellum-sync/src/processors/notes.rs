//! Per-note download and storage.
//!
//! Sync chunks carry note metadata only. Each note's full content is fetched
//! in its own request; a bounded number of those run concurrently, in waves,
//! so one slow note never stalls the rest of its wave's neighbours for long
//! and cancellation gets a checkpoint between waves.

use crate::cancel::CancellationToken;
use crate::client::NoteStoreClient;
use crate::error::SyncResult;
use crate::processors::{DownloadCallback, ItemProcessor};
use crate::status::DownloadStatus;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_storage::LocalStorage;
use vellum_types::{AuthenticationInfo, Guid, Note, SyncChunk, Usn};

enum Outcome {
    Processed(Note, Usn),
    FailedDownload(Note, String),
    FailedProcess(Note, String),
}

/// Downloads full notes named by sync chunks and writes them to local
/// storage.
pub struct NotesProcessor {
    client: Arc<dyn NoteStoreClient>,
    storage: Arc<dyn LocalStorage>,
    max_concurrent: usize,
}

impl NotesProcessor {
    pub fn new(
        client: Arc<dyn NoteStoreClient>,
        storage: Arc<dyn LocalStorage>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            storage,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Downloads and stores one note. `guid` is taken from the chunk entry,
    /// which [`ItemProcessor::extract`] has already vetted.
    async fn process_one(&self, guid: Guid, note: Note, auth: &AuthenticationInfo) -> Outcome {
        let mut incoming = match self.client.note_with_content(&guid, auth).await {
            Ok(downloaded) => downloaded,
            Err(e) => return Outcome::FailedDownload(note, e.to_string()),
        };
        incoming.locally_modified = false;

        match self.storage.find_note_by_guid(&guid).await {
            Ok(Some(existing)) => {
                incoming.local_id = existing.local_id;
                incoming.locally_favorited = existing.locally_favorited;
                if incoming.notebook_guid == existing.notebook_guid {
                    incoming.notebook_local_id = existing.notebook_local_id;
                }
                // Resources keep their local identity across updates too.
                for resource in &mut incoming.resources {
                    let matched = existing
                        .resources
                        .iter()
                        .find(|r| r.guid.is_some() && r.guid == resource.guid);
                    if let Some(matched) = matched {
                        resource.local_id = matched.local_id;
                    }
                    resource.note_local_id = Some(incoming.local_id);
                }
            }
            Ok(None) => {
                for resource in &mut incoming.resources {
                    resource.note_local_id = Some(incoming.local_id);
                }
            }
            Err(e) => return Outcome::FailedProcess(note, e.to_string()),
        }

        let usn = incoming.usn.or(note.usn).unwrap_or(Usn::ZERO);
        match self.storage.put_note(incoming.clone()).await {
            Ok(()) => Outcome::Processed(incoming, usn),
            Err(e) => Outcome::FailedProcess(note, e.to_string()),
        }
    }
}

#[async_trait]
impl ItemProcessor<Note> for NotesProcessor {
    fn extract(&self, chunks: &[SyncChunk]) -> (Vec<Note>, Vec<Guid>) {
        let mut items = Vec::new();
        let mut expunged = Vec::new();
        for chunk in chunks {
            for note in &chunk.notes {
                if note.guid.is_none() {
                    warn!("Skipping a chunk note without guid");
                    continue;
                }
                items.push(note.clone());
            }
            expunged.extend(chunk.expunged_notes.iter().copied());
        }
        (items, expunged)
    }

    async fn process(
        &self,
        items: Vec<Note>,
        expunged: Vec<Guid>,
        auth: &AuthenticationInfo,
        cancel: &CancellationToken,
        callback: &dyn DownloadCallback<Note>,
    ) -> SyncResult<DownloadStatus<Note>> {
        let mut status = DownloadStatus {
            total_to_download: items.len(),
            total_to_expunge: expunged.len(),
            ..DownloadStatus::default()
        };
        callback.on_total_computed(items.len(), expunged.len()).await;

        let mut next = 0;
        while next < items.len() {
            if cancel.is_cancelled() {
                break;
            }
            let wave_end = (next + self.max_concurrent).min(items.len());
            let wave = &items[next..wave_end];
            // extract() dropped guid-less entries already.
            let outcomes = join_all(wave.iter().filter_map(|note| {
                let guid = note.guid?;
                Some(self.process_one(guid, note.clone(), auth))
            }))
            .await;
            for outcome in outcomes {
                match outcome {
                    Outcome::Processed(note, usn) => {
                        if let Some(guid) = note.guid {
                            status.processed.insert(guid, usn);
                        }
                        callback.on_processed(&note, usn).await;
                    }
                    Outcome::FailedDownload(note, error) => {
                        warn!("Failed to download note: {}", error);
                        callback.on_failed_to_download(&note, &error).await;
                        status.failed_to_download.push((note, error));
                    }
                    Outcome::FailedProcess(note, error) => {
                        warn!("Failed to store note: {}", error);
                        callback.on_failed_to_process(&note, &error).await;
                        status.failed_to_process.push((note, error));
                    }
                }
            }
            next = wave_end;
        }

        // Items past the cancellation point were never attempted.
        for note in &items[next..] {
            callback.on_cancelled(note).await;
            status.cancelled.push(note.clone());
        }

        for guid in &expunged {
            if cancel.is_cancelled() {
                // The watermark does not advance on a cancelled run, so the
                // next run sees these expunges again.
                break;
            }
            match self.storage.expunge_note_by_guid(guid).await {
                Ok(()) => {
                    callback.on_expunged(guid).await;
                    status.expunged.push(*guid);
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!("Failed to expunge note {}: {}", guid, error);
                    callback.on_failed_to_expunge(guid, &error).await;
                    status.failed_to_expunge.push((*guid, error));
                }
            }
        }

        debug!(
            "Notes pass: {} stored, {} failed, {} cancelled, {} expunged",
            status.processed.len(),
            status.failed_to_download.len() + status.failed_to_process.len(),
            status.cancelled.len(),
            status.expunged.len()
        );
        Ok(status)
    }
}
