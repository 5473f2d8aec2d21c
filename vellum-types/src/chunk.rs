//! Sync chunks, the unit of incremental download.

use crate::entities::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag};
use crate::ids::Guid;
use crate::usn::Usn;
use serde::{Deserialize, Serialize};

/// One batch of entity mutations and deletions between two watermarks.
///
/// `chunk_high_usn` is the highest USN covered by this chunk, or `None` when
/// the chunk is empty because the requested watermark is already current.
/// `update_count` is the scope's overall high watermark at the time the chunk
/// was produced; the download loop is finished once `chunk_high_usn` reaches
/// it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncChunk {
    pub chunk_high_usn: Option<Usn>,
    pub update_count: Usn,
    pub notebooks: Vec<Notebook>,
    pub tags: Vec<Tag>,
    pub searches: Vec<SavedSearch>,
    pub notes: Vec<Note>,
    pub resources: Vec<Resource>,
    pub linked_notebooks: Vec<LinkedNotebook>,
    pub expunged_notebooks: Vec<Guid>,
    pub expunged_tags: Vec<Guid>,
    pub expunged_searches: Vec<Guid>,
    pub expunged_notes: Vec<Guid>,
    pub expunged_linked_notebooks: Vec<Guid>,
}

impl SyncChunk {
    /// Returns true if the chunk carries no mutations and no deletions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notebooks.is_empty()
            && self.tags.is_empty()
            && self.searches.is_empty()
            && self.notes.is_empty()
            && self.resources.is_empty()
            && self.linked_notebooks.is_empty()
            && self.expunged_notebooks.is_empty()
            && self.expunged_tags.is_empty()
            && self.expunged_searches.is_empty()
            && self.expunged_notes.is_empty()
            && self.expunged_linked_notebooks.is_empty()
    }
}

/// Selects which entity kinds a sync-chunk request should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChunkFilter {
    pub include_notebooks: bool,
    pub include_tags: bool,
    pub include_searches: bool,
    pub include_notes: bool,
    pub include_resources: bool,
    pub include_linked_notebooks: bool,
    /// Whether deletions should be reported. Full syncs leave this off: a
    /// fresh download has nothing to delete.
    pub include_expunged: bool,
}

impl SyncChunkFilter {
    /// Filter for the account's own scope.
    #[must_use]
    pub const fn account(include_expunged: bool) -> Self {
        Self {
            include_notebooks: true,
            include_tags: true,
            include_searches: true,
            include_notes: true,
            include_resources: true,
            include_linked_notebooks: true,
            include_expunged,
        }
    }

    /// Filter for a linked notebook's scope. Saved searches and linked
    /// notebooks never appear there.
    #[must_use]
    pub const fn linked_notebook(include_expunged: bool) -> Self {
        Self {
            include_notebooks: true,
            include_tags: true,
            include_searches: false,
            include_notes: true,
            include_resources: true,
            include_linked_notebooks: false,
            include_expunged,
        }
    }
}
