//! Observation hooks for a running download.

use crate::downloader::ScopeSummary;
use crate::state_store::SyncScope;
use crate::status::MetadataCounters;
use vellum_types::{LinkedNotebook, Usn};

/// Receives progress notifications while a download runs.
///
/// Every method has an empty default body; implementors override only what
/// they care about. Calls arrive from whichever task made the progress, so
/// implementations must be internally synchronized.
pub trait SyncObserver: Send + Sync {
    /// One sync chunk landed. `highest` is the chunk's high water mark,
    /// `server` the server's current update count and `previous` the
    /// watermark this run started from.
    fn on_sync_chunks_downloaded(
        &self,
        _scope: &SyncScope,
        _highest: Usn,
        _server: Usn,
        _previous: Usn,
    ) {
    }

    /// The account chunks revealed the current set of linked notebooks.
    fn on_linked_notebooks_discovered(&self, _linked_notebooks: &[LinkedNotebook]) {}

    /// Counters for one metadata kind changed.
    fn on_metadata_progress(&self, _scope: &SyncScope, _kind: &str, _counters: &MetadataCounters) {}

    fn on_note_progress(&self, _scope: &SyncScope, _downloaded: usize, _total: usize) {}

    fn on_resource_progress(&self, _scope: &SyncScope, _downloaded: usize, _total: usize) {}

    /// A scope ran to its end, whatever the outcome.
    fn on_scope_finished(&self, _scope: &SyncScope, _summary: &ScopeSummary) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl SyncObserver for NullObserver {}
