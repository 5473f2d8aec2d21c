use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use vellum_storage::{EntityKind, GuidFilter, LocalStorage, MemoryStorage, StorageResult};
use vellum_sync::{CancellationToken, FullSyncStaleDataExpunger, PreservedGuids, SyncError};
use vellum_types::{
    Guid, LinkedNotebook, LocalId, Note, Notebook, NotebookPublishing, NotebookRestrictions,
    Resource, SavedSearch, SyncChunk, Tag, Usn,
};

fn make_notebook(name: &str, guid: Guid, modified: bool) -> Notebook {
    Notebook {
        guid: Some(guid),
        usn: Some(Usn::new(1)),
        name: name.to_string(),
        locally_modified: modified,
        ..Default::default()
    }
}

fn make_tag(name: &str, guid: Guid, modified: bool) -> Tag {
    Tag {
        guid: Some(guid),
        usn: Some(Usn::new(1)),
        name: name.to_string(),
        locally_modified: modified,
        ..Default::default()
    }
}

fn make_search(name: &str, guid: Guid, modified: bool) -> SavedSearch {
    SavedSearch {
        guid: Some(guid),
        usn: Some(Usn::new(1)),
        name: name.to_string(),
        query: format!("intitle:{name}"),
        locally_modified: modified,
        ..Default::default()
    }
}

fn make_note(title: &str, guid: Guid, modified: bool) -> Note {
    Note {
        guid: Some(guid),
        usn: Some(Usn::new(1)),
        title: title.to_string(),
        locally_modified: modified,
        ..Default::default()
    }
}

/// Wraps [`MemoryStorage`] and records every reborn row written back, since
/// local-only rows are invisible to guid lookups afterwards.
#[derive(Default)]
struct RecordingStorage {
    inner: MemoryStorage,
    put_notebooks: Mutex<Vec<Notebook>>,
    put_notes: Mutex<Vec<Note>>,
    put_searches: Mutex<Vec<SavedSearch>>,
}

#[async_trait]
impl LocalStorage for RecordingStorage {
    async fn list_guids(
        &self,
        kind: EntityKind,
        filter: GuidFilter,
        linked_notebook_guid: Option<&Guid>,
    ) -> StorageResult<HashSet<Guid>> {
        self.inner.list_guids(kind, filter, linked_notebook_guid).await
    }

    async fn find_notebook_by_guid(&self, guid: &Guid) -> StorageResult<Option<Notebook>> {
        self.inner.find_notebook_by_guid(guid).await
    }

    async fn put_notebook(&self, notebook: Notebook) -> StorageResult<()> {
        self.put_notebooks.lock().unwrap().push(notebook.clone());
        self.inner.put_notebook(notebook).await
    }

    async fn expunge_notebook_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        self.inner.expunge_notebook_by_guid(guid).await
    }

    async fn find_tag_by_guid(&self, guid: &Guid) -> StorageResult<Option<Tag>> {
        self.inner.find_tag_by_guid(guid).await
    }

    async fn put_tag(&self, tag: Tag) -> StorageResult<()> {
        self.inner.put_tag(tag).await
    }

    async fn expunge_tag_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        self.inner.expunge_tag_by_guid(guid).await
    }

    async fn list_tags(&self) -> StorageResult<Vec<Tag>> {
        self.inner.list_tags().await
    }

    async fn find_saved_search_by_guid(&self, guid: &Guid) -> StorageResult<Option<SavedSearch>> {
        self.inner.find_saved_search_by_guid(guid).await
    }

    async fn put_saved_search(&self, search: SavedSearch) -> StorageResult<()> {
        self.put_searches.lock().unwrap().push(search.clone());
        self.inner.put_saved_search(search).await
    }

    async fn expunge_saved_search_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        self.inner.expunge_saved_search_by_guid(guid).await
    }

    async fn find_note_by_guid(&self, guid: &Guid) -> StorageResult<Option<Note>> {
        self.inner.find_note_by_guid(guid).await
    }

    async fn put_note(&self, note: Note) -> StorageResult<()> {
        self.put_notes.lock().unwrap().push(note.clone());
        self.inner.put_note(note).await
    }

    async fn expunge_note_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        self.inner.expunge_note_by_guid(guid).await
    }

    async fn find_resource_by_guid(&self, guid: &Guid) -> StorageResult<Option<Resource>> {
        self.inner.find_resource_by_guid(guid).await
    }

    async fn put_resource(&self, resource: Resource) -> StorageResult<()> {
        self.inner.put_resource(resource).await
    }

    async fn find_linked_notebook_by_guid(
        &self,
        guid: &Guid,
    ) -> StorageResult<Option<LinkedNotebook>> {
        self.inner.find_linked_notebook_by_guid(guid).await
    }

    async fn put_linked_notebook(&self, linked_notebook: LinkedNotebook) -> StorageResult<()> {
        self.inner.put_linked_notebook(linked_notebook).await
    }

    async fn expunge_linked_notebook_by_guid(&self, guid: &Guid) -> StorageResult<()> {
        self.inner.expunge_linked_notebook_by_guid(guid).await
    }

    async fn list_linked_notebooks(&self) -> StorageResult<Vec<LinkedNotebook>> {
        self.inner.list_linked_notebooks().await
    }
}

// ── Clean stale rows ─────────────────────────────────────────────

#[tokio::test]
async fn clean_stale_rows_are_expunged() {
    let storage = Arc::new(MemoryStorage::new());
    let stale_nb = Guid::new();
    let kept_nb = Guid::new();
    let stale_tag = Guid::new();
    let stale_search = Guid::new();
    let stale_note = Guid::new();

    storage.put_notebook(make_notebook("stale", stale_nb, false)).await.unwrap();
    storage.put_notebook(make_notebook("kept", kept_nb, false)).await.unwrap();
    storage.put_tag(make_tag("stale", stale_tag, false)).await.unwrap();
    storage.put_saved_search(make_search("stale", stale_search, false)).await.unwrap();
    storage.put_note(make_note("stale", stale_note, false)).await.unwrap();

    let mut preserved = PreservedGuids::default();
    preserved.notebooks.insert(kept_nb);

    let expunger = FullSyncStaleDataExpunger::new(storage.clone());
    expunger
        .expunge_stale_data(&preserved, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(storage.find_notebook_by_guid(&stale_nb).await.unwrap().is_none());
    assert!(storage.find_notebook_by_guid(&kept_nb).await.unwrap().is_some());
    assert!(storage.find_tag_by_guid(&stale_tag).await.unwrap().is_none());
    assert!(storage.find_saved_search_by_guid(&stale_search).await.unwrap().is_none());
    assert!(storage.find_note_by_guid(&stale_note).await.unwrap().is_none());
}

#[tokio::test]
async fn preserved_guids_collect_from_chunks() {
    let nb = Guid::new();
    let tag = Guid::new();
    let search = Guid::new();
    let note = Guid::new();
    let chunk = SyncChunk {
        chunk_high_usn: Some(Usn::new(4)),
        update_count: Usn::new(4),
        notebooks: vec![make_notebook("n", nb, false)],
        tags: vec![make_tag("t", tag, false)],
        searches: vec![make_search("s", search, false)],
        notes: vec![make_note("o", note, false)],
        ..Default::default()
    };

    let preserved = PreservedGuids::from_chunks(&[chunk]);

    assert!(preserved.notebooks.contains(&nb));
    assert!(preserved.tags.contains(&tag));
    assert!(preserved.saved_searches.contains(&search));
    assert!(preserved.notes.contains(&note));
}

// ── Dirty stale rows are reborn ──────────────────────────────────

#[tokio::test]
async fn dirty_stale_notebook_is_reborn_local_only() {
    let storage = Arc::new(RecordingStorage::default());
    let guid = Guid::new();
    let mut notebook = make_notebook("Drafts", guid, true);
    notebook.restrictions = Some(NotebookRestrictions::default());
    notebook.publishing = Some(NotebookPublishing::default());
    let old_local_id = notebook.local_id;
    storage.put_notebook(notebook).await.unwrap();
    storage.put_notebooks.lock().unwrap().clear();

    let expunger = FullSyncStaleDataExpunger::new(storage.clone());
    expunger
        .expunge_stale_data(&PreservedGuids::default(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(storage.find_notebook_by_guid(&guid).await.unwrap().is_none());
    let reborn = storage.put_notebooks.lock().unwrap();
    assert_eq!(reborn.len(), 1);
    assert_eq!(reborn[0].name, "Drafts");
    assert_eq!(reborn[0].guid, None);
    assert_eq!(reborn[0].usn, None);
    assert_eq!(reborn[0].restrictions, None);
    assert_eq!(reborn[0].publishing, None);
    assert!(reborn[0].locally_modified);
    assert_ne!(reborn[0].local_id, old_local_id);
}

#[tokio::test]
async fn dirty_stale_tag_is_reborn_at_the_root() {
    let storage = Arc::new(MemoryStorage::new());
    let parent = Guid::new();
    let child = Guid::new();
    let mut tag = make_tag("nested", child, true);
    tag.parent_guid = Some(parent);
    tag.parent_local_id = Some(LocalId::new());
    let old_local_id = tag.local_id;
    storage.put_tag(tag).await.unwrap();

    let expunger = FullSyncStaleDataExpunger::new(storage.clone());
    expunger
        .expunge_stale_data(&PreservedGuids::default(), None, &CancellationToken::new())
        .await
        .unwrap();

    let tags = storage.list_tags().await.unwrap();
    assert_eq!(tags.len(), 1);
    let reborn = &tags[0];
    assert_eq!(reborn.name, "nested");
    assert_eq!(reborn.guid, None);
    assert_eq!(reborn.usn, None);
    assert_eq!(reborn.parent_guid, None);
    assert_eq!(reborn.parent_local_id, None);
    assert!(reborn.locally_modified);
    assert_ne!(reborn.local_id, old_local_id);
}

#[tokio::test]
async fn dirty_stale_note_remaps_into_reborn_containers() {
    let storage = Arc::new(RecordingStorage::default());
    let notebook_guid = Guid::new();
    let tag_guid = Guid::new();
    let note_guid = Guid::new();
    let resource_guid = Guid::new();

    let notebook = make_notebook("Drafts", notebook_guid, true);
    let notebook_local_id = notebook.local_id;
    let tag = make_tag("urgent", tag_guid, true);
    let tag_local_id = tag.local_id;
    let mut note = make_note("draft", note_guid, true);
    note.notebook_guid = Some(notebook_guid);
    note.notebook_local_id = Some(notebook_local_id);
    note.tag_guids = vec![tag_guid];
    note.tag_local_ids = vec![tag_local_id];
    let old_resource_local_id = LocalId::new();
    note.resources = vec![Resource {
        local_id: old_resource_local_id,
        guid: Some(resource_guid),
        usn: Some(Usn::new(1)),
        note_guid: Some(note_guid),
        note_local_id: Some(note.local_id),
        mime: Some("image/png".to_string()),
        ..Default::default()
    }];

    storage.put_notebook(notebook).await.unwrap();
    storage.put_tag(tag).await.unwrap();
    storage.put_note(note).await.unwrap();
    storage.put_notebooks.lock().unwrap().clear();
    storage.put_notes.lock().unwrap().clear();

    let expunger = FullSyncStaleDataExpunger::new(storage.clone());
    expunger
        .expunge_stale_data(&PreservedGuids::default(), None, &CancellationToken::new())
        .await
        .unwrap();

    let reborn_tag_local_id = storage.list_tags().await.unwrap()[0].local_id;
    let new_notebook_local_id = {
        let reborn = storage.put_notebooks.lock().unwrap();
        assert_eq!(reborn.len(), 1);
        reborn[0].local_id
    };

    {
        let reborn_notes = storage.put_notes.lock().unwrap();
        assert_eq!(reborn_notes.len(), 1);
        let note = &reborn_notes[0];
        assert_eq!(note.guid, None);
        assert_eq!(note.usn, None);
        assert_eq!(note.notebook_guid, None);
        assert_eq!(note.notebook_local_id, Some(new_notebook_local_id));
        assert!(note.tag_guids.is_empty());
        assert_eq!(note.tag_local_ids, vec![reborn_tag_local_id]);
        assert!(note.locally_modified);

        assert_eq!(note.resources.len(), 1);
        let resource = &note.resources[0];
        assert_eq!(resource.guid, None);
        assert_eq!(resource.usn, None);
        assert_eq!(resource.note_guid, None);
        assert_eq!(resource.note_local_id, Some(note.local_id));
        assert_eq!(resource.mime.as_deref(), Some("image/png"));
        assert!(resource.locally_modified);
        assert_ne!(resource.local_id, old_resource_local_id);
    }

    assert!(storage.find_note_by_guid(&note_guid).await.unwrap().is_none());
    assert!(storage.find_resource_by_guid(&resource_guid).await.unwrap().is_none());
}

#[tokio::test]
async fn preserved_rows_survive_untouched() {
    let storage = Arc::new(RecordingStorage::default());
    let clean = Guid::new();
    let dirty = Guid::new();
    storage.put_notebook(make_notebook("clean", clean, false)).await.unwrap();
    storage.put_notebook(make_notebook("dirty", dirty, true)).await.unwrap();
    storage.put_notebooks.lock().unwrap().clear();

    let mut preserved = PreservedGuids::default();
    preserved.notebooks.insert(clean);
    preserved.notebooks.insert(dirty);

    let expunger = FullSyncStaleDataExpunger::new(storage.clone());
    expunger
        .expunge_stale_data(&preserved, None, &CancellationToken::new())
        .await
        .unwrap();

    // Neither expunged nor reborn: the dirty one keeps its guid.
    let kept = storage.find_notebook_by_guid(&dirty).await.unwrap().unwrap();
    assert_eq!(kept.usn, Some(Usn::new(1)));
    assert!(storage.find_notebook_by_guid(&clean).await.unwrap().is_some());
    assert!(storage.put_notebooks.lock().unwrap().is_empty());
}

// ── Scoping ──────────────────────────────────────────────────────

#[tokio::test]
async fn linked_scope_leaves_the_account_alone() {
    let storage = Arc::new(MemoryStorage::new());
    let linked_guid = Guid::new();
    let account_nb = Guid::new();
    let linked_nb = Guid::new();
    let account_search = Guid::new();

    storage.put_notebook(make_notebook("mine", account_nb, false)).await.unwrap();
    let mut shared = make_notebook("ours", linked_nb, false);
    shared.linked_notebook_guid = Some(linked_guid);
    storage.put_notebook(shared).await.unwrap();
    storage
        .put_saved_search(make_search("todo", account_search, false))
        .await
        .unwrap();

    let expunger = FullSyncStaleDataExpunger::new(storage.clone());
    expunger
        .expunge_stale_data(
            &PreservedGuids::default(),
            Some(&linked_guid),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(storage.find_notebook_by_guid(&linked_nb).await.unwrap().is_none());
    assert!(storage.find_notebook_by_guid(&account_nb).await.unwrap().is_some());
    // Saved searches never belong to a linked notebook's scope.
    assert!(storage.find_saved_search_by_guid(&account_search).await.unwrap().is_some());
}

// ── Cancellation ─────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_aborts_before_any_mutation() {
    let storage = Arc::new(MemoryStorage::new());
    let stale = Guid::new();
    storage.put_notebook(make_notebook("stale", stale, false)).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let expunger = FullSyncStaleDataExpunger::new(storage.clone());
    let err = expunger
        .expunge_stale_data(&PreservedGuids::default(), None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert!(storage.find_notebook_by_guid(&stale).await.unwrap().is_some());
}
