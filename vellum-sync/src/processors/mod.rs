//! Chunk content processors.
//!
//! Metadata kinds (notebooks, tags, saved searches) are applied straight out
//! of the chunks. Notes and resources arrive as bare metadata and go through
//! a per-item download before storage; their processors run behind
//! [`DurableProcessor`], which journals every outcome.

pub mod durable;
pub mod metadata;
pub mod notes;
pub mod resources;

pub use durable::DurableProcessor;
pub use metadata::{MetadataEntity, MetadataProcessor};
pub use notes::NotesProcessor;
pub use resources::ResourcesProcessor;

use crate::cancel::CancellationToken;
use crate::error::SyncResult;
use crate::status::DownloadStatus;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use vellum_types::{AuthenticationInfo, Guid, Note, Resource, SyncChunk, Usn};

/// An individually downloadable content item carried by sync chunks.
pub trait DownloadItem: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Journal directory name for this kind.
    const KIND: &'static str;

    /// The item's service-side identity. Chunks never carry items without
    /// one, so a `None` here marks a malformed chunk entry.
    fn guid(&self) -> Option<Guid>;

    /// The item's update sequence number as reported by the chunk.
    fn usn(&self) -> Option<Usn>;
}

impl DownloadItem for Note {
    const KIND: &'static str = "notes";

    fn guid(&self) -> Option<Guid> {
        self.guid
    }

    fn usn(&self) -> Option<Usn> {
        self.usn
    }
}

impl DownloadItem for Resource {
    const KIND: &'static str = "resources";

    fn guid(&self) -> Option<Guid> {
        self.guid
    }

    fn usn(&self) -> Option<Usn> {
        self.usn
    }
}

/// Fired as each item reaches its final outcome for this run. Defaults are
/// no-ops; implementors override what they consume.
///
/// The methods are async so a wrapper can finish durable bookkeeping before
/// the event travels further.
#[async_trait]
pub trait DownloadCallback<I: Send + Sync>: Send + Sync {
    /// Totals are known before the first per-item outcome fires.
    async fn on_total_computed(&self, _to_download: usize, _to_expunge: usize) {}

    async fn on_processed(&self, _item: &I, _usn: Usn) {}

    async fn on_failed_to_download(&self, _item: &I, _error: &str) {}

    async fn on_failed_to_process(&self, _item: &I, _error: &str) {}

    async fn on_cancelled(&self, _item: &I) {}

    async fn on_expunged(&self, _guid: &Guid) {}

    async fn on_failed_to_expunge(&self, _guid: &Guid, _error: &str) {}
}

/// Callback that ignores everything.
pub struct NullCallback;

#[async_trait]
impl<I: Send + Sync> DownloadCallback<I> for NullCallback {}

/// Downloads and stores one content kind out of a set of sync chunks.
#[async_trait]
pub trait ItemProcessor<I: DownloadItem>: Send + Sync {
    /// Pulls this kind's items and expunge instructions out of the chunks.
    fn extract(&self, chunks: &[SyncChunk]) -> (Vec<I>, Vec<Guid>);

    /// Downloads, stores and expunges the given items. Individual failures
    /// land in the returned status rather than aborting the run; only
    /// cancellation and unrecoverable storage faults cut it short.
    async fn process(
        &self,
        items: Vec<I>,
        expunged: Vec<Guid>,
        auth: &AuthenticationInfo,
        cancel: &CancellationToken,
        callback: &dyn DownloadCallback<I>,
    ) -> SyncResult<DownloadStatus<I>>;
}
