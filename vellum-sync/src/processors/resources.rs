//! Per-resource download and storage.
//!
//! Incremental chunks list changed resources separately from their notes.
//! Bodies are fetched one request per resource, in bounded waves like notes.
//! Resources are never expunged on their own; they disappear with their
//! note.

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
use vellum_types::{AuthenticationInfo, Guid, Resource, SyncChunk, Usn};

enum Outcome {
    Processed(Resource, Usn),
    FailedDownload(Resource, String),
    FailedProcess(Resource, String),
}

/// Downloads full resources named by sync chunks and writes them to local
/// storage.
pub struct ResourcesProcessor {
    client: Arc<dyn NoteStoreClient>,
    storage: Arc<dyn LocalStorage>,
    max_concurrent: usize,
}

impl ResourcesProcessor {
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

    async fn process_one(
        &self,
        guid: Guid,
        resource: Resource,
        auth: &AuthenticationInfo,
    ) -> Outcome {
        let mut incoming = match self.client.resource_with_data(&guid, auth).await {
            Ok(downloaded) => downloaded,
            Err(e) => return Outcome::FailedDownload(resource, e.to_string()),
        };
        incoming.locally_modified = false;

        match self.storage.find_resource_by_guid(&guid).await {
            Ok(Some(existing)) => {
                incoming.local_id = existing.local_id;
                if incoming.note_guid == existing.note_guid {
                    incoming.note_local_id = existing.note_local_id;
                }
            }
            Ok(None) => {
                // A fresh resource points at its note through the guid; the
                // local linkage comes from the already-stored note.
                if let Some(note_guid) = incoming.note_guid {
                    match self.storage.find_note_by_guid(&note_guid).await {
                        Ok(Some(note)) => incoming.note_local_id = Some(note.local_id),
                        Ok(None) => {}
                        Err(e) => return Outcome::FailedProcess(resource, e.to_string()),
                    }
                }
            }
            Err(e) => return Outcome::FailedProcess(resource, e.to_string()),
        }

        let usn = incoming.usn.or(resource.usn).unwrap_or(Usn::ZERO);
        match self.storage.put_resource(incoming.clone()).await {
            Ok(()) => Outcome::Processed(incoming, usn),
            Err(e) => Outcome::FailedProcess(resource, e.to_string()),
        }
    }
}

#[async_trait]
impl ItemProcessor<Resource> for ResourcesProcessor {
    fn extract(&self, chunks: &[SyncChunk]) -> (Vec<Resource>, Vec<Guid>) {
        let mut items = Vec::new();
        for chunk in chunks {
            for resource in &chunk.resources {
                if resource.guid.is_none() {
                    warn!("Skipping a chunk resource without guid");
                    continue;
                }
                items.push(resource.clone());
            }
        }
        (items, Vec::new())
    }

    async fn process(
        &self,
        items: Vec<Resource>,
        expunged: Vec<Guid>,
        auth: &AuthenticationInfo,
        cancel: &CancellationToken,
        callback: &dyn DownloadCallback<Resource>,
    ) -> SyncResult<DownloadStatus<Resource>> {
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
            let outcomes = join_all(wave.iter().filter_map(|resource| {
                let guid = resource.guid?;
                Some(self.process_one(guid, resource.clone(), auth))
            }))
            .await;
            for outcome in outcomes {
                match outcome {
                    Outcome::Processed(resource, usn) => {
                        if let Some(guid) = resource.guid {
                            status.processed.insert(guid, usn);
                        }
                        callback.on_processed(&resource, usn).await;
                    }
                    Outcome::FailedDownload(resource, error) => {
                        warn!("Failed to download resource: {}", error);
                        callback.on_failed_to_download(&resource, &error).await;
                        status.failed_to_download.push((resource, error));
                    }
                    Outcome::FailedProcess(resource, error) => {
                        warn!("Failed to store resource: {}", error);
                        callback.on_failed_to_process(&resource, &error).await;
                        status.failed_to_process.push((resource, error));
                    }
                }
            }
            next = wave_end;
        }

        for resource in &items[next..] {
            callback.on_cancelled(resource).await;
            status.cancelled.push(resource.clone());
        }

        debug!(
            "Resources pass: {} stored, {} failed, {} cancelled",
            status.processed.len(),
            status.failed_to_download.len() + status.failed_to_process.len(),
            status.cancelled.len()
        );
        Ok(status)
    }
}
