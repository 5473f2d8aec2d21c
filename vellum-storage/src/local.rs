//! The local-storage seam the sync engine writes through.
//!
//! The engine never talks to a database directly; everything goes through
//! [`LocalStorage`]. Implementations must tolerate concurrent reads and
//! serialize writes to the same row. [`crate::MemoryStorage`] is the
//! in-crate implementation; persistent backends live with the embedding
//! application.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::collections::HashSet;
use vellum_types::{Guid, LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag};

/// The entity kinds that participate in guid listing and stale-data cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Notebook,
    Tag,
    SavedSearch,
    Note,
}

impl EntityKind {
    /// Stable lowercase name, used in log lines and storage keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Notebook => "notebook",
            EntityKind::Tag => "tag",
            EntityKind::SavedSearch => "saved_search",
            EntityKind::Note => "note",
        }
    }
}

/// Narrows a guid listing by local flags. `None` means "either".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuidFilter {
    pub locally_modified: Option<bool>,
    pub locally_favorited: Option<bool>,
}

impl GuidFilter {
    /// Matches entities with unsynchronized local edits.
    #[must_use]
    pub const fn modified() -> Self {
        Self {
            locally_modified: Some(true),
            locally_favorited: None,
        }
    }

    /// Matches entities without unsynchronized local edits.
    #[must_use]
    pub const fn unmodified() -> Self {
        Self {
            locally_modified: Some(false),
            locally_favorited: None,
        }
    }
}

/// Abstract local persistent store.
///
/// `put_*` upserts: an existing row with the same local id is replaced, and a
/// row holding the same guid under a different local id is superseded.
/// `expunge_*` removes the row entirely; expunging a note also removes its
/// resources. Guids are only ever listed for entities that have one;
/// local-only entities are invisible to [`LocalStorage::list_guids`].
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// Lists guids of one entity kind, filtered by local flags and scoped to
    /// the account (`None`) or to one linked notebook.
    ///
    /// Notes are scoped through their containing notebook; saved searches
    /// exist only in the account scope, so a linked scope yields none.
    async fn list_guids(
        &self,
        kind: EntityKind,
        filter: GuidFilter,
        linked_notebook_guid: Option<&Guid>,
    ) -> StorageResult<HashSet<Guid>>;

    async fn find_notebook_by_guid(&self, guid: &Guid) -> StorageResult<Option<Notebook>>;
    async fn put_notebook(&self, notebook: Notebook) -> StorageResult<()>;
    async fn expunge_notebook_by_guid(&self, guid: &Guid) -> StorageResult<()>;

    async fn find_tag_by_guid(&self, guid: &Guid) -> StorageResult<Option<Tag>>;
    async fn put_tag(&self, tag: Tag) -> StorageResult<()>;
    async fn expunge_tag_by_guid(&self, guid: &Guid) -> StorageResult<()>;
    /// All tags, across scopes. Used by the cleanup pass that removes tags
    /// of no-longer-linked notebooks.
    async fn list_tags(&self) -> StorageResult<Vec<Tag>>;

    async fn find_saved_search_by_guid(&self, guid: &Guid) -> StorageResult<Option<SavedSearch>>;
    async fn put_saved_search(&self, search: SavedSearch) -> StorageResult<()>;
    async fn expunge_saved_search_by_guid(&self, guid: &Guid) -> StorageResult<()>;

    async fn find_note_by_guid(&self, guid: &Guid) -> StorageResult<Option<Note>>;
    async fn put_note(&self, note: Note) -> StorageResult<()>;
    async fn expunge_note_by_guid(&self, guid: &Guid) -> StorageResult<()>;

    async fn find_resource_by_guid(&self, guid: &Guid) -> StorageResult<Option<Resource>>;
    async fn put_resource(&self, resource: Resource) -> StorageResult<()>;

    async fn find_linked_notebook_by_guid(
        &self,
        guid: &Guid,
    ) -> StorageResult<Option<LinkedNotebook>>;
    async fn put_linked_notebook(&self, linked_notebook: LinkedNotebook) -> StorageResult<()>;
    async fn expunge_linked_notebook_by_guid(&self, guid: &Guid) -> StorageResult<()>;
    async fn list_linked_notebooks(&self) -> StorageResult<Vec<LinkedNotebook>>;
}
