//! In-memory [`LocalStorage`] implementation.
//!
//! Complete enough to back every sync-engine test and small enough to serve
//! tiny installs; persistent backends implement the same trait elsewhere.

use crate::error::{StorageError, StorageResult};
use crate::local::{EntityKind, GuidFilter, LocalStorage};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use vellum_types::{Guid, LinkedNotebook, LocalId, Note, Notebook, Resource, SavedSearch, Tag};

#[derive(Default)]
struct Inner {
    notebooks: HashMap<LocalId, Notebook>,
    tags: HashMap<LocalId, Tag>,
    searches: HashMap<LocalId, SavedSearch>,
    notes: HashMap<LocalId, Note>,
    /// Standalone resource rows from incremental sync. Resources embedded in
    /// notes stay inside their note row; standalone rows shadow them for
    /// guid lookups.
    resources: HashMap<LocalId, Resource>,
    linked_notebooks: HashMap<Guid, LinkedNotebook>,
}

impl Inner {
    /// Scope of a note, resolved through its containing notebook.
    fn note_scope(&self, note: &Note) -> Option<Guid> {
        let by_local_id = note
            .notebook_local_id
            .and_then(|lid| self.notebooks.get(&lid));
        let notebook = by_local_id.or_else(|| {
            note.notebook_guid
                .and_then(|g| self.notebooks.values().find(|n| n.guid == Some(g)))
        });
        notebook.and_then(|n| n.linked_notebook_guid)
    }
}

fn matches(filter: GuidFilter, modified: bool, favorited: bool) -> bool {
    filter.locally_modified.is_none_or(|want| want == modified)
        && filter.locally_favorited.is_none_or(|want| want == favorited)
}

fn scope_matches(scope: Option<&Guid>, entity_scope: Option<Guid>) -> bool {
    scope.copied() == entity_scope
}

/// A `HashMap`-backed store guarded by a single `RwLock`.
///
/// Reads run concurrently; writes serialize behind the lock, which satisfies
/// the same-row write contract trivially.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStorage for MemoryStorage {
    async fn list_guids(
        &self,
        kind: EntityKind,
        filter: GuidFilter,
        linked_notebook_guid: Option<&Guid>,
    ) -> StorageResult<HashSet<Guid>> {
        let inner = self.inner.read().await;
        let guids = match kind {
            EntityKind::Notebook => inner
                .notebooks
                .values()
                .filter(|n| matches(filter, n.locally_modified, n.locally_favorited))
                .filter(|n| scope_matches(linked_notebook_guid, n.linked_notebook_guid))
                .filter_map(|n| n.guid)
                .collect(),
            EntityKind::Tag => inner
                .tags
                .values()
                .filter(|t| matches(filter, t.locally_modified, t.locally_favorited))
                .filter(|t| scope_matches(linked_notebook_guid, t.linked_notebook_guid))
                .filter_map(|t| t.guid)
                .collect(),
            EntityKind::SavedSearch => {
                // Saved searches only exist in the account scope.
                if linked_notebook_guid.is_some() {
                    HashSet::new()
                } else {
                    inner
                        .searches
                        .values()
                        .filter(|s| matches(filter, s.locally_modified, s.locally_favorited))
                        .filter_map(|s| s.guid)
                        .collect()
                }
            }
            EntityKind::Note => inner
                .notes
                .values()
                .filter(|n| matches(filter, n.locally_modified, n.locally_favorited))
                .filter(|n| scope_matches(linked_notebook_guid, inner.note_scope(n)))
                .filter_map(|n| n.guid)
                .collect(),
        };
        Ok(guids)
    }

    async fn find_notebook_by_guid(&self, guid: &Guid) -> StorageResult<Option<Notebook>> {
        let inner = self.inner.read().await;
        Ok(inner
            .notebooks
            .values()
            .find(|n| n.guid == Some(*guid))
            .cloned())
    }

    async fn put_notebook(&self, notebook: Notebook) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(g) = notebook.guid {
            inner
                .notebooks
                .retain(|lid, row| row.guid != Some(g) || *lid == notebook.local_id);
        }
        inner.notebooks.insert(notebook.local_id, notebook);
        Ok(())
    }

    async fn expunge_notebook_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.notebooks.retain(|_, n| n.guid != Some(*guid));
        debug!("Expunged notebook {}", guid);
        Ok(())
    }

    async fn find_tag_by_guid(&self, guid: &Guid) -> StorageResult<Option<Tag>> {
        let inner = self.inner.read().await;
        Ok(inner.tags.values().find(|t| t.guid == Some(*guid)).cloned())
    }

    async fn put_tag(&self, tag: Tag) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(g) = tag.guid {
            inner
                .tags
                .retain(|lid, row| row.guid != Some(g) || *lid == tag.local_id);
        }
        inner.tags.insert(tag.local_id, tag);
        Ok(())
    }

    async fn expunge_tag_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.tags.retain(|_, t| t.guid != Some(*guid));
        debug!("Expunged tag {}", guid);
        Ok(())
    }

    async fn list_tags(&self) -> StorageResult<Vec<Tag>> {
        let inner = self.inner.read().await;
        Ok(inner.tags.values().cloned().collect())
    }

    async fn find_saved_search_by_guid(&self, guid: &Guid) -> StorageResult<Option<SavedSearch>> {
        let inner = self.inner.read().await;
        Ok(inner
            .searches
            .values()
            .find(|s| s.guid == Some(*guid))
            .cloned())
    }

    async fn put_saved_search(&self, search: SavedSearch) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(g) = search.guid {
            inner
                .searches
                .retain(|lid, row| row.guid != Some(g) || *lid == search.local_id);
        }
        inner.searches.insert(search.local_id, search);
        Ok(())
    }

    async fn expunge_saved_search_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.searches.retain(|_, s| s.guid != Some(*guid));
        debug!("Expunged saved search {}", guid);
        Ok(())
    }

    async fn find_note_by_guid(&self, guid: &Guid) -> StorageResult<Option<Note>> {
        let inner = self.inner.read().await;
        Ok(inner
            .notes
            .values()
            .find(|n| n.guid == Some(*guid))
            .cloned())
    }

    async fn put_note(&self, note: Note) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(g) = note.guid {
            inner
                .notes
                .retain(|lid, row| row.guid != Some(g) || *lid == note.local_id);
        }
        inner.notes.insert(note.local_id, note);
        Ok(())
    }

    async fn expunge_note_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let removed: Vec<LocalId> = inner
            .notes
            .values()
            .filter(|n| n.guid == Some(*guid))
            .map(|n| n.local_id)
            .collect();
        inner.notes.retain(|_, n| n.guid != Some(*guid));
        inner.resources.retain(|_, r| {
            r.note_guid != Some(*guid)
                && !removed.iter().any(|lid| r.note_local_id == Some(*lid))
        });
        debug!("Expunged note {}", guid);
        Ok(())
    }

    async fn find_resource_by_guid(&self, guid: &Guid) -> StorageResult<Option<Resource>> {
        let inner = self.inner.read().await;
        let standalone = inner
            .resources
            .values()
            .find(|r| r.guid == Some(*guid))
            .cloned();
        if standalone.is_some() {
            return Ok(standalone);
        }
        Ok(inner
            .notes
            .values()
            .flat_map(|n| n.resources.iter())
            .find(|r| r.guid == Some(*guid))
            .cloned())
    }

    async fn put_resource(&self, resource: Resource) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(g) = resource.guid {
            inner
                .resources
                .retain(|lid, row| row.guid != Some(g) || *lid == resource.local_id);
        }
        inner.resources.insert(resource.local_id, resource);
        Ok(())
    }

    async fn find_linked_notebook_by_guid(
        &self,
        guid: &Guid,
    ) -> StorageResult<Option<LinkedNotebook>> {
        let inner = self.inner.read().await;
        Ok(inner.linked_notebooks.get(guid).cloned())
    }

    async fn put_linked_notebook(&self, linked_notebook: LinkedNotebook) -> StorageResult<()> {
        let Some(guid) = linked_notebook.guid else {
            return Err(StorageError::InvalidData(
                "linked notebook without guid".to_string(),
            ));
        };
        let mut inner = self.inner.write().await;
        inner.linked_notebooks.insert(guid, linked_notebook);
        Ok(())
    }

    async fn expunge_linked_notebook_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.linked_notebooks.remove(guid);
        debug!("Expunged linked notebook {}", guid);
        Ok(())
    }

    async fn list_linked_notebooks(&self) -> StorageResult<Vec<LinkedNotebook>> {
        let inner = self.inner.read().await;
        Ok(inner.linked_notebooks.values().cloned().collect())
    }
}
