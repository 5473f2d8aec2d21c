//! Progress accounting for one sync scope.

use std::collections::HashMap;
use vellum_types::{Guid, Usn};

/// Counters for one metadata kind (notebooks, tags, saved searches or
/// linked notebooks) processed out of downloaded sync chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataCounters {
    /// Items present in the chunks for this kind.
    pub total: usize,
    /// Expunge instructions present in the chunks for this kind.
    pub total_expunged: usize,
    pub added: usize,
    pub updated: usize,
    pub expunged: usize,
    pub failed: usize,
    pub failed_to_expunge: usize,
}

impl MetadataCounters {
    /// Folds `other` into `self` field by field, so merging two disjoint
    /// runs in either order yields the same counters.
    pub fn merge(&mut self, other: Self) {
        self.total += other.total;
        self.total_expunged += other.total_expunged;
        self.added += other.added;
        self.updated += other.updated;
        self.expunged += other.expunged;
        self.failed += other.failed;
        self.failed_to_expunge += other.failed_to_expunge;
    }
}

/// Outcome bookkeeping for one content kind, notes or resources.
///
/// Every item extracted from the chunks lands in exactly one of
/// `processed`, `failed_to_download`, `failed_to_process` or `cancelled`;
/// every expunged guid lands in `expunged` or `failed_to_expunge`.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadStatus<I> {
    pub total_to_download: usize,
    pub total_to_expunge: usize,
    /// Fully downloaded and stored items, keyed by guid, carrying the
    /// update sequence number they were journaled under.
    pub processed: HashMap<Guid, Usn>,
    pub failed_to_download: Vec<(I, String)>,
    pub failed_to_process: Vec<(I, String)>,
    pub cancelled: Vec<I>,
    pub expunged: Vec<Guid>,
    pub failed_to_expunge: Vec<(Guid, String)>,
}

impl<I> Default for DownloadStatus<I> {
    fn default() -> Self {
        Self {
            total_to_download: 0,
            total_to_expunge: 0,
            processed: HashMap::new(),
            failed_to_download: Vec::new(),
            failed_to_process: Vec::new(),
            cancelled: Vec::new(),
            expunged: Vec::new(),
            failed_to_expunge: Vec::new(),
        }
    }
}

impl<I> DownloadStatus<I> {
    /// Folds `other` into `self`. For guids present on both sides of
    /// `processed` the entry from `other` wins, matching how a retry run
    /// supersedes an earlier attempt.
    pub fn merge(&mut self, other: Self) {
        self.total_to_download += other.total_to_download;
        self.total_to_expunge += other.total_to_expunge;
        self.processed.extend(other.processed);
        self.failed_to_download.extend(other.failed_to_download);
        self.failed_to_process.extend(other.failed_to_process);
        self.cancelled.extend(other.cancelled);
        self.expunged.extend(other.expunged);
        self.failed_to_expunge.extend(other.failed_to_expunge);
    }
}
