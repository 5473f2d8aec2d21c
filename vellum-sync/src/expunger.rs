//! Stale-data cleanup after a full sync.
//!
//! A full sync re-downloads the whole scope, so anything in local storage
//! that the fresh chunk set never mentioned no longer exists on the server.
//! Clean rows are expunged outright. Rows with unsynchronized local edits
//! are kept, but reborn as local-only entities: fresh local id, no guid, no
//! update sequence number, marked modified, so the next upload creates them
//! anew instead of updating a server row that is gone.

use crate::cancel::CancellationToken;
use crate::error::{SyncError, SyncResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use vellum_storage::{EntityKind, GuidFilter, LocalStorage};
use vellum_types::{Guid, LocalId, SyncChunk};

/// Guids that appeared in the full sync's chunks and are therefore current.
#[derive(Debug, Clone, Default)]
pub struct PreservedGuids {
    pub notebooks: HashSet<Guid>,
    pub tags: HashSet<Guid>,
    pub saved_searches: HashSet<Guid>,
    pub notes: HashSet<Guid>,
}

impl PreservedGuids {
    /// Collects every guid the downloaded chunks mention.
    #[must_use]
    pub fn from_chunks(chunks: &[SyncChunk]) -> Self {
        let mut preserved = Self::default();
        for chunk in chunks {
            preserved
                .notebooks
                .extend(chunk.notebooks.iter().filter_map(|n| n.guid));
            preserved
                .tags
                .extend(chunk.tags.iter().filter_map(|t| t.guid));
            preserved
                .saved_searches
                .extend(chunk.searches.iter().filter_map(|s| s.guid));
            preserved
                .notes
                .extend(chunk.notes.iter().filter_map(|n| n.guid));
        }
        preserved
    }
}

/// Removes or rebirths local entities a full sync no longer vouches for.
///
/// Unlike the chunk processors this is fail fast: losing one stale row
/// midway is recoverable (the next full sync sees it again), so any storage
/// error aborts the cleanup rather than being counted and skipped.
pub struct FullSyncStaleDataExpunger {
    storage: Arc<dyn LocalStorage>,
}

impl FullSyncStaleDataExpunger {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    /// Cleans one scope: the account's own (`linked_notebook_guid` of
    /// `None`) or one linked notebook's.
    pub async fn expunge_stale_data(
        &self,
        preserved: &PreservedGuids,
        linked_notebook_guid: Option<&Guid>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        cancel.check()?;
        let scope = linked_notebook_guid;

        // Stale sets are collected before anything is mutated: notes are
        // scoped through their notebook, so expunging notebooks first would
        // hide their notes from the listing.
        let (clean_notebooks, dirty_notebooks, clean_tags, dirty_tags, clean_notes, dirty_notes) =
            tokio::try_join!(
                self.storage
                    .list_guids(EntityKind::Notebook, GuidFilter::unmodified(), scope),
                self.storage
                    .list_guids(EntityKind::Notebook, GuidFilter::modified(), scope),
                self.storage
                    .list_guids(EntityKind::Tag, GuidFilter::unmodified(), scope),
                self.storage
                    .list_guids(EntityKind::Tag, GuidFilter::modified(), scope),
                self.storage
                    .list_guids(EntityKind::Note, GuidFilter::unmodified(), scope),
                self.storage
                    .list_guids(EntityKind::Note, GuidFilter::modified(), scope),
            )?;
        // Saved searches live in the account scope only.
        let (clean_searches, dirty_searches) = if scope.is_none() {
            tokio::try_join!(
                self.storage
                    .list_guids(EntityKind::SavedSearch, GuidFilter::unmodified(), None),
                self.storage
                    .list_guids(EntityKind::SavedSearch, GuidFilter::modified(), None),
            )?
        } else {
            (HashSet::new(), HashSet::new())
        };

        let stale_clean_notebooks = minus(clean_notebooks, &preserved.notebooks);
        let stale_dirty_notebooks = minus(dirty_notebooks, &preserved.notebooks);
        let stale_clean_tags = minus(clean_tags, &preserved.tags);
        let stale_dirty_tags = minus(dirty_tags, &preserved.tags);
        let stale_clean_searches = minus(clean_searches, &preserved.saved_searches);
        let stale_dirty_searches = minus(dirty_searches, &preserved.saved_searches);
        let stale_clean_notes = minus(clean_notes, &preserved.notes);
        let stale_dirty_notes = minus(dirty_notes, &preserved.notes);

        cancel.check()?;
        tokio::try_join!(
            async {
                for guid in &stale_clean_notebooks {
                    self.storage.expunge_notebook_by_guid(guid).await?;
                }
                Ok::<_, SyncError>(())
            },
            async {
                for guid in &stale_clean_tags {
                    self.storage.expunge_tag_by_guid(guid).await?;
                }
                Ok(())
            },
            async {
                for guid in &stale_clean_searches {
                    self.storage.expunge_saved_search_by_guid(guid).await?;
                }
                Ok(())
            },
            async {
                for guid in &stale_clean_notes {
                    self.storage.expunge_note_by_guid(guid).await?;
                }
                Ok(())
            },
        )?;

        cancel.check()?;
        // Container kinds are reborn first; their old-to-new local id maps
        // keep reborn notes attached to the right containers.
        let (notebook_map, tag_map, ()) = tokio::try_join!(
            self.rebirth_notebooks(stale_dirty_notebooks),
            self.rebirth_tags(stale_dirty_tags),
            self.rebirth_saved_searches(stale_dirty_searches),
        )?;

        cancel.check()?;
        self.rebirth_notes(stale_dirty_notes, &notebook_map, &tag_map)
            .await?;

        debug!(
            "Expunged stale data: {} notebooks, {} tags, {} searches, {} notes removed",
            stale_clean_notebooks.len(),
            stale_clean_tags.len(),
            stale_clean_searches.len(),
            stale_clean_notes.len()
        );
        Ok(())
    }

    async fn rebirth_notebooks(
        &self,
        guids: Vec<Guid>,
    ) -> SyncResult<HashMap<LocalId, LocalId>> {
        let mut map = HashMap::new();
        for guid in guids {
            let Some(mut notebook) = self.storage.find_notebook_by_guid(&guid).await? else {
                continue;
            };
            self.storage.expunge_notebook_by_guid(&guid).await?;
            let old_local_id = notebook.local_id;
            notebook.local_id = LocalId::new();
            notebook.guid = None;
            notebook.usn = None;
            notebook.restrictions = None;
            notebook.publishing = None;
            notebook.locally_modified = true;
            let new_local_id = notebook.local_id;
            self.storage.put_notebook(notebook).await?;
            map.insert(old_local_id, new_local_id);
        }
        Ok(map)
    }

    async fn rebirth_tags(&self, guids: Vec<Guid>) -> SyncResult<HashMap<LocalId, LocalId>> {
        let mut map = HashMap::new();
        for guid in guids {
            let Some(mut tag) = self.storage.find_tag_by_guid(&guid).await? else {
                continue;
            };
            self.storage.expunge_tag_by_guid(&guid).await?;
            let old_local_id = tag.local_id;
            tag.local_id = LocalId::new();
            tag.guid = None;
            tag.usn = None;
            // The parent may be gone or reborn itself; a reborn tag starts
            // at the root of the forest.
            tag.parent_guid = None;
            tag.parent_local_id = None;
            tag.locally_modified = true;
            let new_local_id = tag.local_id;
            self.storage.put_tag(tag).await?;
            map.insert(old_local_id, new_local_id);
        }
        Ok(map)
    }

    async fn rebirth_saved_searches(&self, guids: Vec<Guid>) -> SyncResult<()> {
        for guid in guids {
            let Some(mut search) = self.storage.find_saved_search_by_guid(&guid).await? else {
                continue;
            };
            self.storage.expunge_saved_search_by_guid(&guid).await?;
            search.local_id = LocalId::new();
            search.guid = None;
            search.usn = None;
            search.locally_modified = true;
            self.storage.put_saved_search(search).await?;
        }
        Ok(())
    }

    async fn rebirth_notes(
        &self,
        guids: Vec<Guid>,
        notebook_map: &HashMap<LocalId, LocalId>,
        tag_map: &HashMap<LocalId, LocalId>,
    ) -> SyncResult<()> {
        for guid in guids {
            let Some(mut note) = self.storage.find_note_by_guid(&guid).await? else {
                continue;
            };
            // Cascades into the old resource rows as well.
            self.storage.expunge_note_by_guid(&guid).await?;
            note.local_id = LocalId::new();
            note.guid = None;
            note.usn = None;
            note.notebook_guid = None;
            if let Some(old) = note.notebook_local_id {
                if let Some(new) = notebook_map.get(&old) {
                    note.notebook_local_id = Some(*new);
                }
            }
            note.tag_guids.clear();
            for tag_local_id in &mut note.tag_local_ids {
                if let Some(new) = tag_map.get(tag_local_id) {
                    *tag_local_id = *new;
                }
            }
            for resource in &mut note.resources {
                resource.local_id = LocalId::new();
                resource.guid = None;
                resource.usn = None;
                resource.note_guid = None;
                resource.note_local_id = Some(note.local_id);
                resource.locally_modified = true;
            }
            note.locally_modified = true;
            self.storage.put_note(note).await?;
        }
        Ok(())
    }
}

fn minus(all: HashSet<Guid>, preserved: &HashSet<Guid>) -> Vec<Guid> {
    all.into_iter()
        .filter(|guid| !preserved.contains(guid))
        .collect()
}
