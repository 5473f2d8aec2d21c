use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};
use vellum_storage::{LocalStorage, MemoryStorage};
use vellum_sync::client::mock::{MockAuthenticator, MockNoteStoreClient};
use vellum_sync::{
    AuthProviderConfig, AuthenticationInfoProvider, CancellationToken, DownloadJournal,
    DownloaderConfig, MemorySecretStore, MemorySettingsStore, MemorySyncStateStore, ScopeOutcome,
    SyncDownloader, SyncError, SyncMode, SyncObserver, SyncScope, SyncStateStore,
};
use vellum_types::{
    Account, AuthenticationInfo, Guid, LinkedNotebook, Note, Notebook, SavedSearch,
    ServerSyncState, SyncChunk, SyncStateRecord, Tag, Timestamp, UserId, Usn,
};

fn make_auth_info() -> AuthenticationInfo {
    AuthenticationInfo {
        user_id: UserId::new(4815),
        auth_token: "test-token".to_string(),
        shard_id: "s12".to_string(),
        expiration_time: Timestamp::from_millis(Timestamp::now().as_millis() + 3_600_000),
        ..Default::default()
    }
}

fn make_account() -> Account {
    Account::new(UserId::new(4815), "owner", "www.vellum.example")
}

fn make_state(update_count: i64) -> ServerSyncState {
    ServerSyncState {
        current_time: Timestamp::now(),
        full_sync_before: Timestamp::from_millis(0),
        update_count: Usn::new(update_count),
    }
}

fn make_notebook(name: &str, guid: Guid, usn: i64) -> Notebook {
    Notebook {
        guid: Some(guid),
        usn: Some(Usn::new(usn)),
        name: name.to_string(),
        ..Default::default()
    }
}

fn make_tag(name: &str, guid: Guid, usn: i64) -> Tag {
    Tag {
        guid: Some(guid),
        usn: Some(Usn::new(usn)),
        name: name.to_string(),
        ..Default::default()
    }
}

fn make_search(name: &str, guid: Guid, usn: i64) -> SavedSearch {
    SavedSearch {
        guid: Some(guid),
        usn: Some(Usn::new(usn)),
        name: name.to_string(),
        query: format!("intitle:{name}"),
        ..Default::default()
    }
}

fn make_note(title: &str, guid: Guid, usn: i64) -> Note {
    Note {
        guid: Some(guid),
        usn: Some(Usn::new(usn)),
        title: title.to_string(),
        ..Default::default()
    }
}

fn make_linked_notebook(guid: Guid) -> LinkedNotebook {
    LinkedNotebook {
        guid: Some(guid),
        usn: Some(Usn::new(1)),
        share_name: Some("Team Notes".to_string()),
        shard_id: Some("s99".to_string()),
        ..Default::default()
    }
}

struct Harness {
    client: Arc<MockNoteStoreClient>,
    storage: Arc<MemoryStorage>,
    authenticator: Arc<MockAuthenticator>,
    state_store: Arc<MemorySyncStateStore>,
    config: DownloaderConfig,
    _journal_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let journal_dir = tempdir().unwrap();
        let config = DownloaderConfig::new(journal_dir.path().join("journal"));
        Self {
            client: Arc::new(MockNoteStoreClient::new()),
            storage: Arc::new(MemoryStorage::new()),
            authenticator: Arc::new(MockAuthenticator::new(make_auth_info())),
            state_store: Arc::new(MemorySyncStateStore::new()),
            config,
            _journal_dir: journal_dir,
        }
    }

    fn provider(&self) -> Arc<AuthenticationInfoProvider> {
        Arc::new(AuthenticationInfoProvider::new(
            self.authenticator.clone(),
            self.client.clone(),
            Arc::new(MemorySecretStore::new()),
            Arc::new(MemorySettingsStore::new()),
            AuthProviderConfig::default(),
        ))
    }

    fn downloader(&self) -> SyncDownloader {
        SyncDownloader::new(
            self.client.clone(),
            self.storage.clone(),
            self.provider(),
            self.state_store.clone(),
            self.config.clone(),
        )
    }

    fn downloader_with(&self, observer: Arc<dyn SyncObserver>) -> SyncDownloader {
        SyncDownloader::with_observer(
            self.client.clone(),
            self.storage.clone(),
            self.provider(),
            self.state_store.clone(),
            self.config.clone(),
            observer,
        )
    }

    async fn seed_state(&self, scope: SyncScope, usn: i64, time_ms: i64) {
        self.state_store
            .put(
                &scope,
                SyncStateRecord {
                    last_sync_usn: Usn::new(usn),
                    last_sync_time: Timestamp::from_millis(time_ms),
                    full_sync_before: Timestamp::from_millis(0),
                },
            )
            .await
            .unwrap();
    }
}

// ── Account scope end to end ─────────────────────────────────────

#[tokio::test]
async fn initial_full_download_lands_everything() {
    let harness = Harness::new();
    let nb = Guid::new();
    let tg = Guid::new();
    let sr = Guid::new();
    let nt = Guid::new();
    harness.client.set_sync_state(make_state(4));
    harness.client.set_chunks(vec![SyncChunk {
        chunk_high_usn: Some(Usn::new(4)),
        update_count: Usn::new(4),
        notebooks: vec![make_notebook("Inbox", nb, 1)],
        tags: vec![make_tag("urgent", tg, 2)],
        searches: vec![make_search("todo", sr, 3)],
        notes: vec![make_note("first", nt, 4)],
        ..Default::default()
    }]);

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.account.mode, SyncMode::InitialFull);
    assert_eq!(result.account.outcome, ScopeOutcome::Finished);
    assert_eq!(result.account.previous_usn, Usn::ZERO);
    assert_eq!(result.account.server_usn, Usn::new(4));
    assert_eq!(result.account.notebooks.added, 1);
    assert_eq!(result.account.tags.added, 1);
    assert_eq!(result.account.saved_searches.added, 1);
    assert_eq!(result.account.notes.processed.len(), 1);
    assert!(result.linked_notebooks.is_empty());

    let note = harness.storage.find_note_by_guid(&nt).await.unwrap().unwrap();
    assert_eq!(note.content.as_deref(), Some("<note>first</note>"));
    assert!(harness.storage.find_notebook_by_guid(&nb).await.unwrap().is_some());

    let record = harness.state_store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(4));
}

#[tokio::test]
async fn incremental_run_applies_only_new_mutations() {
    let harness = Harness::new();
    let tag_guid = Guid::new();
    let gone_note = Guid::new();
    let new_note = Guid::new();

    // Local state from an earlier sync up to usn 4.
    harness.storage.put_tag(make_tag("old name", tag_guid, 2)).await.unwrap();
    harness.storage.put_note(make_note("doomed", gone_note, 3)).await.unwrap();
    harness
        .seed_state(SyncScope::Account, 4, Timestamp::now().as_millis())
        .await;

    let consumed = SyncChunk {
        chunk_high_usn: Some(Usn::new(4)),
        update_count: Usn::new(6),
        notes: vec![make_note("doomed", gone_note, 3)],
        ..Default::default()
    };
    let fresh = SyncChunk {
        chunk_high_usn: Some(Usn::new(6)),
        update_count: Usn::new(6),
        tags: vec![make_tag("new name", tag_guid, 5)],
        notes: vec![make_note("brand new", new_note, 6)],
        expunged_notes: vec![gone_note],
        ..Default::default()
    };
    harness.client.set_sync_state(make_state(6));
    harness.client.set_chunks(vec![consumed, fresh]);

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.account.mode, SyncMode::Incremental);
    assert_eq!(result.account.previous_usn, Usn::new(4));
    assert_eq!(result.account.tags.updated, 1);
    assert_eq!(result.account.notes.expunged, vec![gone_note]);
    // Only the note past the watermark was fetched.
    assert_eq!(harness.client.note_download_calls(), 1);

    let tag = harness.storage.find_tag_by_guid(&tag_guid).await.unwrap().unwrap();
    assert_eq!(tag.name, "new name");
    assert!(harness.storage.find_note_by_guid(&gone_note).await.unwrap().is_none());
    assert!(harness.storage.find_note_by_guid(&new_note).await.unwrap().is_some());

    let record = harness.state_store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(6));
}

#[tokio::test]
async fn current_watermark_is_a_no_op() {
    let harness = Harness::new();
    harness
        .seed_state(SyncScope::Account, 4, Timestamp::now().as_millis())
        .await;
    harness.client.set_sync_state(make_state(4));

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.account.mode, SyncMode::Incremental);
    assert_eq!(result.account.outcome, ScopeOutcome::Finished);
    assert_eq!(result.account.notes.total_to_download, 0);
    assert_eq!(harness.client.sync_chunk_calls(), 0);
    assert_eq!(harness.client.note_download_calls(), 0);

    let record = harness.state_store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(4));
}

#[tokio::test]
async fn forced_full_cleans_up_stale_rows() {
    let harness = Harness::new();
    let stale_clean = Guid::new();
    let stale_dirty = Guid::new();
    let stale_note = Guid::new();
    let kept_nb = Guid::new();
    let kept_note = Guid::new();

    harness.storage.put_notebook(make_notebook("gone", stale_clean, 1)).await.unwrap();
    let mut dirty = make_notebook("edited offline", stale_dirty, 2);
    dirty.locally_modified = true;
    harness.storage.put_notebook(dirty).await.unwrap();
    harness.storage.put_note(make_note("gone", stale_note, 3)).await.unwrap();

    // The server invalidated incremental history after this client's last run.
    harness.seed_state(SyncScope::Account, 5, 1_000).await;
    harness.client.set_sync_state(ServerSyncState {
        current_time: Timestamp::now(),
        full_sync_before: Timestamp::from_millis(2_000),
        update_count: Usn::new(7),
    });
    harness.client.set_chunks(vec![SyncChunk {
        chunk_high_usn: Some(Usn::new(7)),
        update_count: Usn::new(7),
        notebooks: vec![make_notebook("kept", kept_nb, 6)],
        notes: vec![make_note("kept", kept_note, 7)],
        ..Default::default()
    }]);

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.account.mode, SyncMode::ForcedFull);
    assert_eq!(result.account.previous_usn, Usn::new(5));
    assert_eq!(result.account.outcome, ScopeOutcome::Finished);

    assert!(harness.storage.find_notebook_by_guid(&stale_clean).await.unwrap().is_none());
    // Reborn local-only, so its guid no longer resolves.
    assert!(harness.storage.find_notebook_by_guid(&stale_dirty).await.unwrap().is_none());
    assert!(harness.storage.find_note_by_guid(&stale_note).await.unwrap().is_none());
    assert!(harness.storage.find_notebook_by_guid(&kept_nb).await.unwrap().is_some());
    assert!(harness.storage.find_note_by_guid(&kept_note).await.unwrap().is_some());

    let record = harness.state_store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(7));
    assert_eq!(record.full_sync_before, Timestamp::from_millis(2_000));
}

#[tokio::test]
async fn forced_full_totals_span_every_chunk() {
    let harness = Harness::new();
    let stale = Guid::new();
    harness.storage.put_notebook(make_notebook("stale", stale, 1)).await.unwrap();
    harness.seed_state(SyncScope::Account, 9, 1_000).await;

    // Three pages, each carrying three entities of every kind.
    let mut chunks = Vec::new();
    for page in 0i64..3 {
        let base = page * 12;
        let mut chunk = SyncChunk {
            chunk_high_usn: Some(Usn::new(base + 12)),
            update_count: Usn::new(36),
            ..Default::default()
        };
        for slot in 0..3 {
            let nb = make_notebook(&format!("nb-{page}-{slot}"), Guid::new(), base + slot + 1);
            chunk.notebooks.push(nb);
            let tag = make_tag(&format!("tag-{page}-{slot}"), Guid::new(), base + slot + 4);
            chunk.tags.push(tag);
            let search = make_search(&format!("q-{page}-{slot}"), Guid::new(), base + slot + 7);
            chunk.searches.push(search);
            let note = make_note(&format!("note-{page}-{slot}"), Guid::new(), base + slot + 10);
            chunk.notes.push(note);
        }
        chunks.push(chunk);
    }
    harness.client.set_sync_state(ServerSyncState {
        current_time: Timestamp::now(),
        full_sync_before: Timestamp::from_millis(2_000),
        update_count: Usn::new(36),
    });
    harness.client.set_chunks(chunks);

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.account.mode, SyncMode::ForcedFull);
    assert_eq!(harness.client.sync_chunk_calls(), 3);
    assert_eq!(result.account.notebooks.total, 9);
    assert_eq!(result.account.notebooks.added, 9);
    assert_eq!(result.account.tags.total, 9);
    assert_eq!(result.account.saved_searches.total, 9);
    assert_eq!(result.account.notes.total_to_download, 9);
    assert_eq!(result.account.notes.processed.len(), 9);
    assert_eq!(harness.client.note_download_calls(), 9);

    // The cleanup pass spared everything the chunks carried, and only that.
    assert!(harness.storage.find_notebook_by_guid(&stale).await.unwrap().is_none());

    let record = harness.state_store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(36));
}

#[tokio::test]
async fn account_auth_failure_aborts_the_run() {
    let harness = Harness::new();
    harness.authenticator.set_failing(true);

    let err = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Auth(_)));
    assert!(harness.state_store.get(&SyncScope::Account).await.unwrap().is_none());
}

// ── Linked notebook scopes ───────────────────────────────────────

#[tokio::test]
async fn linked_notebooks_sync_after_the_account() {
    let harness = Harness::new();
    let lg = Guid::new();
    let shared_nb = Guid::new();
    let shared_note = Guid::new();

    harness.client.set_sync_state(make_state(2));
    harness.client.set_chunks(vec![SyncChunk {
        chunk_high_usn: Some(Usn::new(2)),
        update_count: Usn::new(2),
        linked_notebooks: vec![make_linked_notebook(lg)],
        ..Default::default()
    }]);
    harness.client.set_linked_notebook(
        lg,
        make_state(3),
        vec![SyncChunk {
            chunk_high_usn: Some(Usn::new(3)),
            update_count: Usn::new(3),
            notebooks: vec![make_notebook("Shared", shared_nb, 1)],
            notes: vec![make_note("ours", shared_note, 3)],
            ..Default::default()
        }],
    );

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.account.linked_notebooks.added, 1);
    let summary = result.linked_notebooks.get(&lg).unwrap();
    assert_eq!(summary.mode, SyncMode::InitialFull);
    assert_eq!(summary.outcome, ScopeOutcome::Finished);
    assert_eq!(summary.server_usn, Usn::new(3));
    assert_eq!(summary.notebooks.added, 1);
    assert_eq!(summary.notes.processed.len(), 1);

    assert!(harness.storage.find_linked_notebook_by_guid(&lg).await.unwrap().is_some());
    let note = harness.storage.find_note_by_guid(&shared_note).await.unwrap().unwrap();
    assert_eq!(note.content.as_deref(), Some("<note>ours</note>"));

    let record = harness
        .state_store
        .get(&SyncScope::LinkedNotebook(lg))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(3));
    assert_eq!(harness.client.shared_auth_calls(), 1);
}

#[tokio::test]
async fn one_failing_linked_notebook_does_not_block_the_rest() {
    let harness = Harness::new();
    let good = Guid::new();
    let bad = Guid::new();

    harness.client.set_sync_state(make_state(2));
    harness.client.set_chunks(vec![SyncChunk {
        chunk_high_usn: Some(Usn::new(2)),
        update_count: Usn::new(2),
        linked_notebooks: vec![make_linked_notebook(good), make_linked_notebook(bad)],
        ..Default::default()
    }]);
    // Only the first linked notebook exists server side.
    harness.client.set_linked_notebook(
        good,
        make_state(1),
        vec![SyncChunk {
            chunk_high_usn: Some(Usn::new(1)),
            update_count: Usn::new(1),
            notebooks: vec![make_notebook("Shared", Guid::new(), 1)],
            ..Default::default()
        }],
    );

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.linked_notebooks.len(), 2);
    assert_eq!(
        result.linked_notebooks.get(&good).unwrap().outcome,
        ScopeOutcome::Finished
    );
    assert!(matches!(
        result.linked_notebooks.get(&bad).unwrap().outcome,
        ScopeOutcome::Failed(_)
    ));

    assert!(
        harness
            .state_store
            .get(&SyncScope::LinkedNotebook(good))
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        harness
            .state_store
            .get(&SyncScope::LinkedNotebook(bad))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn tags_of_vanished_linked_notebooks_are_expunged() {
    let harness = Harness::new();
    let orphan = Guid::new();
    let kept = Guid::new();
    let mut tag = make_tag("orphan", orphan, 1);
    tag.linked_notebook_guid = Some(Guid::new());
    harness.storage.put_tag(tag).await.unwrap();
    harness.storage.put_tag(make_tag("kept", kept, 2)).await.unwrap();
    harness.client.set_sync_state(make_state(0));

    harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(harness.storage.find_tag_by_guid(&orphan).await.unwrap().is_none());
    assert!(harness.storage.find_tag_by_guid(&kept).await.unwrap().is_some());
}

// ── Cancellation ─────────────────────────────────────────────────

struct CancelAfterFirstChunk(CancellationToken);

impl SyncObserver for CancelAfterFirstChunk {
    fn on_sync_chunks_downloaded(
        &self,
        _scope: &SyncScope,
        _highest: Usn,
        _server: Usn,
        _previous: Usn,
    ) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn cancellation_keeps_partial_progress_but_no_watermark() {
    let harness = Harness::new();
    harness.client.set_sync_state(make_state(4));
    harness.client.set_chunks(vec![
        SyncChunk {
            chunk_high_usn: Some(Usn::new(2)),
            update_count: Usn::new(4),
            ..Default::default()
        },
        SyncChunk {
            chunk_high_usn: Some(Usn::new(4)),
            update_count: Usn::new(4),
            ..Default::default()
        },
    ]);

    let cancel = CancellationToken::new();
    let downloader = harness.downloader_with(Arc::new(CancelAfterFirstChunk(cancel.clone())));
    let result = downloader.download(&make_account(), &cancel).await.unwrap();

    assert_eq!(result.account.outcome, ScopeOutcome::Cancelled);
    assert!(result.linked_notebooks.is_empty());
    assert_eq!(harness.client.sync_chunk_calls(), 1);
    assert!(harness.state_store.get(&SyncScope::Account).await.unwrap().is_none());
}

// ── Progress reporting ───────────────────────────────────────────

#[derive(Default)]
struct ChunkLog(Mutex<Vec<(i64, i64, i64)>>);

impl SyncObserver for ChunkLog {
    fn on_sync_chunks_downloaded(
        &self,
        _scope: &SyncScope,
        highest: Usn,
        server: Usn,
        previous: Usn,
    ) {
        self.0
            .lock()
            .unwrap()
            .push((highest.value(), server.value(), previous.value()));
    }
}

#[tokio::test]
async fn forced_full_reports_the_true_previous_watermark() {
    let harness = Harness::new();
    harness.seed_state(SyncScope::Account, 5, 1_000).await;
    harness.client.set_sync_state(ServerSyncState {
        current_time: Timestamp::now(),
        full_sync_before: Timestamp::from_millis(2_000),
        update_count: Usn::new(7),
    });
    harness.client.set_chunks(vec![SyncChunk {
        chunk_high_usn: Some(Usn::new(7)),
        update_count: Usn::new(7),
        ..Default::default()
    }]);

    let log = Arc::new(ChunkLog::default());
    harness
        .downloader_with(log.clone())
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    // The run restarts from zero, but the reported history does not lie.
    assert_eq!(*log.0.lock().unwrap(), vec![(7, 7, 5)]);
}

// ── Journal lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn initial_full_clears_a_leftover_journal() {
    let harness = Harness::new();
    let g = Guid::new();
    let leftover = DownloadJournal::new(harness.config.journal_dir.join("account"));
    leftover.record_processed("notes", &g, Usn::new(3)).await.unwrap();

    harness.client.set_sync_state(make_state(3));
    harness.client.set_chunks(vec![SyncChunk {
        chunk_high_usn: Some(Usn::new(3)),
        update_count: Usn::new(3),
        notes: vec![make_note("fresh start", g, 3)],
        ..Default::default()
    }]);

    harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    // The stale journal entry did not suppress the download.
    assert_eq!(harness.client.note_download_calls(), 1);
    assert!(harness.storage.find_note_by_guid(&g).await.unwrap().is_some());
}

#[tokio::test]
async fn resumed_incremental_skips_journaled_items() {
    let harness = Harness::new();
    let g = Guid::new();
    let journal = DownloadJournal::new(harness.config.journal_dir.join("account"));
    journal.record_processed("notes", &g, Usn::new(3)).await.unwrap();
    harness
        .seed_state(SyncScope::Account, 2, Timestamp::now().as_millis())
        .await;

    harness.client.set_sync_state(make_state(3));
    harness.client.set_chunks(vec![SyncChunk {
        chunk_high_usn: Some(Usn::new(3)),
        update_count: Usn::new(3),
        notes: vec![make_note("already here", g, 3)],
        ..Default::default()
    }]);

    let result = harness
        .downloader()
        .download(&make_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(harness.client.note_download_calls(), 0);
    assert_eq!(result.account.notes.total_to_download, 0);
    assert_eq!(result.account.outcome, ScopeOutcome::Finished);

    let record = harness.state_store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(3));
}
