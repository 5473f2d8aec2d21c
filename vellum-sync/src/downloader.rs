//! The download side of synchronization.
//!
//! One [`SyncDownloader::download`] call covers the account's own scope and
//! every linked notebook shared into it. Each scope independently decides
//! between a full and an incremental run from its persisted watermark,
//! downloads its chunks, applies metadata, downloads note and resource
//! content through the durable journal, and persists its new watermark only
//! when it ran to the end. Linked notebook scopes are isolated from one
//! another: one failing or lagging scope never blocks the others.

use crate::auth::{AuthMode, AuthenticationInfoProvider};
use crate::cancel::CancellationToken;
use crate::chunks::{ChunkProgress, SyncChunksDownloader};
use crate::client::NoteStoreClient;
use crate::error::{SyncError, SyncResult};
use crate::expunger::{FullSyncStaleDataExpunger, PreservedGuids};
use crate::journal::DownloadJournal;
use crate::observer::{NullObserver, SyncObserver};
use crate::processors::{
    DownloadCallback, DownloadItem, DurableProcessor, MetadataEntity, MetadataProcessor,
    NotesProcessor, ResourcesProcessor,
};
use crate::state_store::{SyncScope, SyncStateStore};
use crate::status::{DownloadStatus, MetadataCounters};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use vellum_storage::LocalStorage;
use vellum_types::{
    Account, AuthenticationInfo, Guid, LinkedNotebook, Note, Notebook, Resource, SavedSearch,
    ServerSyncState, SyncChunk, SyncChunkFilter, SyncStateRecord, Tag, Usn,
};

/// How a scope's run relates to its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No persisted watermark; everything is downloaded for the first time.
    InitialFull,
    /// The server invalidated incremental history (`full_sync_before`), so
    /// the scope is re-downloaded from zero and stale rows cleaned up after.
    ForcedFull,
    /// Only mutations past the persisted watermark are downloaded.
    Incremental,
}

/// Tunables for [`SyncDownloader`].
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Directory the per-scope download journals live under.
    pub journal_dir: PathBuf,
    /// Upper bound on entries per sync chunk request.
    pub max_entries_per_chunk: u32,
    /// How many note or resource downloads run at once within a scope.
    pub max_concurrent_downloads: usize,
}

impl DownloaderConfig {
    pub fn new(journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            journal_dir: journal_dir.into(),
            max_entries_per_chunk: 100,
            max_concurrent_downloads: 8,
        }
    }
}

/// How one scope's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeOutcome {
    Finished,
    Cancelled,
    Failed(String),
}

/// Everything that happened within one scope during a download.
#[derive(Debug, Clone)]
pub struct ScopeSummary {
    pub mode: SyncMode,
    /// The watermark the scope had before this run. Stays at the true
    /// previous value even when a full run restarts the download from zero.
    pub previous_usn: Usn,
    /// The server's update count when the run began.
    pub server_usn: Usn,
    pub notebooks: MetadataCounters,
    pub tags: MetadataCounters,
    pub saved_searches: MetadataCounters,
    pub linked_notebooks: MetadataCounters,
    pub notes: DownloadStatus<Note>,
    pub resources: DownloadStatus<Resource>,
    pub outcome: ScopeOutcome,
}

impl ScopeSummary {
    fn new(mode: SyncMode, previous_usn: Usn, server_usn: Usn) -> Self {
        Self {
            mode,
            previous_usn,
            server_usn,
            notebooks: MetadataCounters::default(),
            tags: MetadataCounters::default(),
            saved_searches: MetadataCounters::default(),
            linked_notebooks: MetadataCounters::default(),
            notes: DownloadStatus::default(),
            resources: DownloadStatus::default(),
            outcome: ScopeOutcome::Finished,
        }
    }
}

/// The result of one [`SyncDownloader::download`] call.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub account: ScopeSummary,
    pub linked_notebooks: HashMap<Guid, ScopeSummary>,
}

/// Orchestrates the whole download across scopes.
pub struct SyncDownloader {
    client: Arc<dyn NoteStoreClient>,
    storage: Arc<dyn LocalStorage>,
    auth_provider: Arc<AuthenticationInfoProvider>,
    state_store: Arc<dyn SyncStateStore>,
    observer: Arc<dyn SyncObserver>,
    config: DownloaderConfig,
}

impl SyncDownloader {
    pub fn new(
        client: Arc<dyn NoteStoreClient>,
        storage: Arc<dyn LocalStorage>,
        auth_provider: Arc<AuthenticationInfoProvider>,
        state_store: Arc<dyn SyncStateStore>,
        config: DownloaderConfig,
    ) -> Self {
        Self::with_observer(
            client,
            storage,
            auth_provider,
            state_store,
            config,
            Arc::new(NullObserver),
        )
    }

    /// Creates a downloader that reports progress to `observer`.
    pub fn with_observer(
        client: Arc<dyn NoteStoreClient>,
        storage: Arc<dyn LocalStorage>,
        auth_provider: Arc<AuthenticationInfoProvider>,
        state_store: Arc<dyn SyncStateStore>,
        config: DownloaderConfig,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            client,
            storage,
            auth_provider,
            state_store,
            observer,
            config,
        }
    }

    /// Runs one download across the account scope and all linked notebook
    /// scopes.
    ///
    /// An account-scope failure aborts the whole call; linked notebook
    /// failures are confined to their scope's summary. Cancellation ends the
    /// run early with whatever each scope had finished, and no watermark is
    /// advanced for scopes that did not run to the end.
    pub async fn download(
        &self,
        account: &Account,
        cancel: &CancellationToken,
    ) -> SyncResult<DownloadResult> {
        info!("Starting download for {}@{}", account.id, account.host);
        let auth = self
            .auth_provider
            .authenticate_account(account, AuthMode::Cache)
            .await?;
        let server_state = self.client.sync_state(&auth).await?;
        let scope = SyncScope::Account;
        let persisted = self.state_store.get(&scope).await?;
        let (mode, after_usn, previous_usn) = decide_mode(persisted, &server_state);
        info!(
            "Account scope syncs {:?} from usn {} toward {}",
            mode, after_usn, server_state.update_count
        );

        let journal = Arc::new(DownloadJournal::new(
            self.config.journal_dir.join(scope.relative_path()),
        ));
        if mode == SyncMode::InitialFull {
            journal.clear().await?;
        }

        let mut summary = ScopeSummary::new(mode, previous_usn, server_state.update_count);
        let run = self
            .run_account_scope(&auth, &server_state, after_usn, &journal, cancel, &mut summary)
            .await;
        match run {
            Ok(watermark) => {
                summary.outcome = ScopeOutcome::Finished;
                self.state_store
                    .put(
                        &scope,
                        SyncStateRecord {
                            last_sync_usn: watermark,
                            last_sync_time: server_state.current_time,
                            full_sync_before: server_state.full_sync_before,
                        },
                    )
                    .await?;
            }
            Err(SyncError::Cancelled) => summary.outcome = ScopeOutcome::Cancelled,
            Err(e) => return Err(e),
        }
        self.observer.on_scope_finished(&scope, &summary);

        // A cancelled account scope ends the run; linked scopes would only
        // be cancelled one step later anyway.
        let mut linked_summaries = HashMap::new();
        if summary.outcome == ScopeOutcome::Finished && !cancel.is_cancelled() {
            let linked_notebooks = self.storage.list_linked_notebooks().await?;
            self.observer
                .on_linked_notebooks_discovered(&linked_notebooks);

            let runs = join_all(linked_notebooks.iter().filter_map(|linked_notebook| {
                let Some(guid) = linked_notebook.guid else {
                    warn!("Skipping a linked notebook without guid");
                    return None;
                };
                Some(self.run_linked_scope(account, linked_notebook, guid, cancel))
            }))
            .await;
            for (guid, linked_summary) in runs {
                linked_summaries.insert(guid, linked_summary);
            }

            self.expunge_orphaned_linked_tags(&linked_notebooks).await;
        }

        info!("Download finished for {}@{}", account.id, account.host);
        Ok(DownloadResult {
            account: summary,
            linked_notebooks: linked_summaries,
        })
    }

    /// Runs every stage of the account scope. Returns the final watermark.
    async fn run_account_scope(
        &self,
        auth: &AuthenticationInfo,
        server_state: &ServerSyncState,
        after_usn: Usn,
        journal: &Arc<DownloadJournal>,
        cancel: &CancellationToken,
        summary: &mut ScopeSummary,
    ) -> SyncResult<Usn> {
        let scope = SyncScope::Account;
        let mode = summary.mode;
        let filter = SyncChunkFilter::account(mode == SyncMode::Incremental);
        let chunk_progress = ChunkProgressAdapter {
            observer: self.observer.as_ref(),
            scope,
            previous: summary.previous_usn,
        };
        let downloader =
            SyncChunksDownloader::new(self.client.clone(), self.config.max_entries_per_chunk);
        let chunks = downloader
            .download_account_chunks(
                after_usn,
                server_state,
                &filter,
                auth,
                cancel,
                &chunk_progress,
            )
            .await?;

        let observer = self.observer.as_ref();
        let meta = MetadataProcessor::new(self.storage.clone());
        let notebook_progress: &(dyn Fn(&MetadataCounters) + Send + Sync) = &|c| {
            observer.on_metadata_progress(&scope, Notebook::NAME, c);
        };
        let tag_progress: &(dyn Fn(&MetadataCounters) + Send + Sync) = &|c| {
            observer.on_metadata_progress(&scope, Tag::NAME, c);
        };
        let saved_search_progress: &(dyn Fn(&MetadataCounters) + Send + Sync) = &|c| {
            observer.on_metadata_progress(&scope, SavedSearch::NAME, c);
        };
        let linked_notebook_progress: &(dyn Fn(&MetadataCounters) + Send + Sync) = &|c| {
            observer.on_metadata_progress(&scope, LinkedNotebook::NAME, c);
        };
        let (notebooks, tags, saved_searches, linked_notebooks) = tokio::try_join!(
            meta.process::<Notebook>(&chunks, cancel, notebook_progress),
            meta.process::<Tag>(&chunks, cancel, tag_progress),
            meta.process::<SavedSearch>(&chunks, cancel, saved_search_progress),
            meta.process::<LinkedNotebook>(&chunks, cancel, linked_notebook_progress),
        )?;
        summary.notebooks = notebooks;
        summary.tags = tags;
        summary.saved_searches = saved_searches;
        summary.linked_notebooks = linked_notebooks;
        cancel.check()?;

        if mode == SyncMode::ForcedFull {
            let preserved = PreservedGuids::from_chunks(&chunks);
            FullSyncStaleDataExpunger::new(self.storage.clone())
                .expunge_stale_data(&preserved, None, cancel)
                .await?;
        }

        self.run_content_stages(&chunks, auth, journal, scope, cancel, summary)
            .await?;

        Ok(final_watermark(&chunks, after_usn))
    }

    /// Runs one linked notebook scope end to end, isolating its failures.
    async fn run_linked_scope(
        &self,
        account: &Account,
        linked_notebook: &LinkedNotebook,
        guid: Guid,
        cancel: &CancellationToken,
    ) -> (Guid, ScopeSummary) {
        let scope = SyncScope::LinkedNotebook(guid);
        let mut summary = ScopeSummary::new(SyncMode::InitialFull, Usn::ZERO, Usn::ZERO);
        let run = self
            .try_linked_scope(account, linked_notebook, guid, cancel, &mut summary)
            .await;
        summary.outcome = match run {
            Ok(()) => ScopeOutcome::Finished,
            Err(SyncError::Cancelled) => ScopeOutcome::Cancelled,
            Err(e) => {
                warn!("Linked notebook {} failed to sync: {}", guid, e);
                ScopeOutcome::Failed(e.to_string())
            }
        };
        self.observer.on_scope_finished(&scope, &summary);
        (guid, summary)
    }

    async fn try_linked_scope(
        &self,
        account: &Account,
        linked_notebook: &LinkedNotebook,
        guid: Guid,
        cancel: &CancellationToken,
        summary: &mut ScopeSummary,
    ) -> SyncResult<()> {
        let scope = SyncScope::LinkedNotebook(guid);
        cancel.check()?;
        let auth = self
            .auth_provider
            .authenticate_to_linked_notebook(account, linked_notebook, AuthMode::Cache)
            .await?;
        let server_state = self
            .client
            .linked_notebook_sync_state(linked_notebook, &auth)
            .await?;
        let persisted = self.state_store.get(&scope).await?;
        let (mode, after_usn, previous_usn) = decide_mode(persisted, &server_state);
        debug!(
            "{} syncs {:?} from usn {} toward {}",
            scope, mode, after_usn, server_state.update_count
        );
        summary.mode = mode;
        summary.previous_usn = previous_usn;
        summary.server_usn = server_state.update_count;

        let journal = Arc::new(DownloadJournal::new(
            self.config.journal_dir.join(scope.relative_path()),
        ));
        if mode == SyncMode::InitialFull {
            journal.clear().await?;
        }

        let chunk_progress = ChunkProgressAdapter {
            observer: self.observer.as_ref(),
            scope,
            previous: previous_usn,
        };
        let downloader =
            SyncChunksDownloader::new(self.client.clone(), self.config.max_entries_per_chunk);
        let chunks = downloader
            .download_linked_notebook_chunks(
                linked_notebook,
                after_usn,
                mode != SyncMode::Incremental,
                &server_state,
                &auth,
                cancel,
                &chunk_progress,
            )
            .await?;

        // Linked notebook chunks never carry saved searches or further
        // linked notebooks.
        let observer = self.observer.as_ref();
        let meta = MetadataProcessor::new(self.storage.clone());
        let notebook_progress: &(dyn Fn(&MetadataCounters) + Send + Sync) = &|c| {
            observer.on_metadata_progress(&scope, Notebook::NAME, c);
        };
        let tag_progress: &(dyn Fn(&MetadataCounters) + Send + Sync) = &|c| {
            observer.on_metadata_progress(&scope, Tag::NAME, c);
        };
        let (notebooks, tags) = tokio::try_join!(
            meta.process::<Notebook>(&chunks, cancel, notebook_progress),
            meta.process::<Tag>(&chunks, cancel, tag_progress),
        )?;
        summary.notebooks = notebooks;
        summary.tags = tags;
        cancel.check()?;

        if mode == SyncMode::ForcedFull {
            let preserved = PreservedGuids::from_chunks(&chunks);
            FullSyncStaleDataExpunger::new(self.storage.clone())
                .expunge_stale_data(&preserved, Some(&guid), cancel)
                .await?;
        }

        self.run_content_stages(&chunks, &auth, &journal, scope, cancel, summary)
            .await?;

        self.state_store
            .put(
                &scope,
                SyncStateRecord {
                    last_sync_usn: final_watermark(&chunks, after_usn),
                    last_sync_time: server_state.current_time,
                    full_sync_before: server_state.full_sync_before,
                },
            )
            .await?;
        Ok(())
    }

    /// Downloads note then resource content for one scope through the
    /// durable journal.
    async fn run_content_stages(
        &self,
        chunks: &[SyncChunk],
        auth: &AuthenticationInfo,
        journal: &Arc<DownloadJournal>,
        scope: SyncScope,
        cancel: &CancellationToken,
        summary: &mut ScopeSummary,
    ) -> SyncResult<()> {
        let notes = DurableProcessor::new(
            Arc::new(NotesProcessor::new(
                self.client.clone(),
                self.storage.clone(),
                self.config.max_concurrent_downloads,
            )),
            journal.clone(),
        );
        let progress = ContentProgress::new(self.observer.clone(), scope, ContentKind::Notes);
        summary.notes = notes.process_chunks(chunks, auth, cancel, &progress).await?;
        cancel.check()?;

        let resources = DurableProcessor::new(
            Arc::new(ResourcesProcessor::new(
                self.client.clone(),
                self.storage.clone(),
                self.config.max_concurrent_downloads,
            )),
            journal.clone(),
        );
        let progress = ContentProgress::new(self.observer.clone(), scope, ContentKind::Resources);
        summary.resources = resources
            .process_chunks(chunks, auth, cancel, &progress)
            .await?;
        cancel.check()?;
        Ok(())
    }

    /// Tags of linked notebooks that no longer exist serve nothing; the
    /// cleanup is best effort.
    async fn expunge_orphaned_linked_tags(&self, linked_notebooks: &[LinkedNotebook]) {
        let current: HashSet<Guid> = linked_notebooks
            .iter()
            .filter_map(|linked_notebook| linked_notebook.guid)
            .collect();
        let tags = match self.storage.list_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Failed to list tags for linked notebook cleanup: {}", e);
                return;
            }
        };
        for tag in tags {
            let Some(linked_guid) = tag.linked_notebook_guid else {
                continue;
            };
            if current.contains(&linked_guid) {
                continue;
            }
            let Some(guid) = tag.guid else {
                continue;
            };
            debug!(
                "Expunging tag {} of vanished linked notebook {}",
                guid, linked_guid
            );
            if let Err(e) = self.storage.expunge_tag_by_guid(&guid).await {
                warn!("Failed to expunge orphaned tag {}: {}", guid, e);
            }
        }
    }
}

/// Chooses the scope's mode and starting watermark from its history.
///
/// Full runs restart the download from zero while the reported previous
/// watermark keeps its true value.
fn decide_mode(
    persisted: Option<SyncStateRecord>,
    server_state: &ServerSyncState,
) -> (SyncMode, Usn, Usn) {
    match persisted {
        None => (SyncMode::InitialFull, Usn::ZERO, Usn::ZERO),
        Some(record) => {
            if record.last_sync_time < server_state.full_sync_before {
                (SyncMode::ForcedFull, Usn::ZERO, record.last_sync_usn)
            } else {
                (SyncMode::Incremental, record.last_sync_usn, record.last_sync_usn)
            }
        }
    }
}

fn final_watermark(chunks: &[SyncChunk], after_usn: Usn) -> Usn {
    chunks
        .last()
        .and_then(|chunk| chunk.chunk_high_usn)
        .unwrap_or(after_usn)
}

struct ChunkProgressAdapter<'a> {
    observer: &'a dyn SyncObserver,
    scope: SyncScope,
    previous: Usn,
}

impl ChunkProgress for ChunkProgressAdapter<'_> {
    fn on_chunk(&self, highest: Usn, server: Usn) {
        self.observer
            .on_sync_chunks_downloaded(&self.scope, highest, server, self.previous);
    }
}

#[derive(Clone, Copy)]
enum ContentKind {
    Notes,
    Resources,
}

/// Counts terminal per-item outcomes toward a done/total pair for the
/// observer.
struct ContentProgress {
    observer: Arc<dyn SyncObserver>,
    scope: SyncScope,
    kind: ContentKind,
    done: AtomicUsize,
    total: AtomicUsize,
}

impl ContentProgress {
    fn new(observer: Arc<dyn SyncObserver>, scope: SyncScope, kind: ContentKind) -> Self {
        Self {
            observer,
            scope,
            kind,
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    fn bump(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        match self.kind {
            ContentKind::Notes => self.observer.on_note_progress(&self.scope, done, total),
            ContentKind::Resources => self.observer.on_resource_progress(&self.scope, done, total),
        }
    }
}

#[async_trait]
impl<I: DownloadItem> DownloadCallback<I> for ContentProgress {
    async fn on_total_computed(&self, to_download: usize, _to_expunge: usize) {
        self.total.store(to_download, Ordering::SeqCst);
    }

    async fn on_processed(&self, _item: &I, _usn: Usn) {
        self.bump();
    }

    async fn on_failed_to_download(&self, _item: &I, _error: &str) {
        self.bump();
    }

    async fn on_failed_to_process(&self, _item: &I, _error: &str) {
        self.bump();
    }

    async fn on_cancelled(&self, _item: &I) {
        self.bump();
    }
}
