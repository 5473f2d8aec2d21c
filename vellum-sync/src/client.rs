//! Remote-service client seams.
//!
//! [`NoteStoreClient`] is the wire-level client talking to one shard of the
//! service; the engine only consumes this interface, the wire protocol lives
//! with the embedding application. [`Authenticator`] is the account-level
//! login flow (OAuth UI or otherwise), likewise owned by the application.

use crate::error::SyncResult;
use async_trait::async_trait;
use vellum_types::{
    Account, AuthenticationInfo, Guid, LinkedNotebook, Note, Resource, ServerSyncState, SyncChunk,
    SyncChunkFilter, Usn,
};

/// Wire-level client for the note-store service.
#[async_trait]
pub trait NoteStoreClient: Send + Sync {
    /// Queries the current sync state of the account's own scope.
    async fn sync_state(&self, auth: &AuthenticationInfo) -> SyncResult<ServerSyncState>;

    /// Downloads one sync chunk of the account's own scope, covering
    /// mutations strictly after `after_usn`, at most `max_entries` of them.
    async fn sync_chunk(
        &self,
        after_usn: Usn,
        max_entries: u32,
        filter: &SyncChunkFilter,
        auth: &AuthenticationInfo,
    ) -> SyncResult<SyncChunk>;

    /// Queries the current sync state of one linked notebook's scope.
    async fn linked_notebook_sync_state(
        &self,
        linked_notebook: &LinkedNotebook,
        auth: &AuthenticationInfo,
    ) -> SyncResult<ServerSyncState>;

    /// Downloads one sync chunk of a linked notebook's scope.
    async fn linked_notebook_sync_chunk(
        &self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        max_entries: u32,
        full_sync_only: bool,
        auth: &AuthenticationInfo,
    ) -> SyncResult<SyncChunk>;

    /// Exchanges the account's own credentials for credentials valid in the
    /// linked notebook's scope.
    async fn authenticate_to_shared_notebook(
        &self,
        linked_notebook: &LinkedNotebook,
        account_auth: &AuthenticationInfo,
    ) -> SyncResult<AuthenticationInfo>;

    /// Downloads one note in full, content and embedded resources included.
    async fn note_with_content(
        &self,
        guid: &Guid,
        auth: &AuthenticationInfo,
    ) -> SyncResult<Note>;

    /// Downloads one resource in full, body included.
    async fn resource_with_data(
        &self,
        guid: &Guid,
        auth: &AuthenticationInfo,
    ) -> SyncResult<Resource>;
}

/// The account-level login flow owned by the embedding application.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Performs a fresh network authentication for the account.
    async fn authenticate(&self, account: &Account) -> SyncResult<AuthenticationInfo>;
}

/// Configurable in-process fakes of the remote service, for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vellum_types::Timestamp;

    #[derive(Default)]
    struct RemoteState {
        sync_state: ServerSyncState,
        chunks: Vec<SyncChunk>,
        linked_sync_states: HashMap<Guid, ServerSyncState>,
        linked_chunks: HashMap<Guid, Vec<SyncChunk>>,
        notes: HashMap<Guid, Note>,
        resources: HashMap<Guid, Resource>,
        failing_notes: HashSet<Guid>,
        failing_resources: HashSet<Guid>,
    }

    /// Finds the first chunk advancing past `after_usn`, or synthesizes the
    /// "already current" empty chunk.
    fn select_chunk(chunks: &[SyncChunk], after_usn: Usn, update_count: Usn) -> SyncChunk {
        chunks
            .iter()
            .find(|c| c.chunk_high_usn.is_some_and(|high| high > after_usn))
            .cloned()
            .unwrap_or(SyncChunk {
                chunk_high_usn: None,
                update_count,
                ..Default::default()
            })
    }

    fn find_note_metadata(chunks: &[SyncChunk], guid: &Guid) -> Option<Note> {
        chunks
            .iter()
            .flat_map(|c| c.notes.iter())
            .find(|n| n.guid == Some(*guid))
            .cloned()
    }

    fn find_resource_metadata(chunks: &[SyncChunk], guid: &Guid) -> Option<Resource> {
        chunks
            .iter()
            .flat_map(|c| c.resources.iter())
            .find(|r| r.guid == Some(*guid))
            .cloned()
    }

    /// A scriptable note-store fake.
    ///
    /// Chunks are served in the order configured: each `sync_chunk` call
    /// returns the first chunk whose high USN lies past the requested
    /// watermark. Note and resource downloads return explicitly stored
    /// bodies, or synthesize one from the chunk metadata.
    #[derive(Default)]
    pub struct MockNoteStoreClient {
        state: Mutex<RemoteState>,
        sync_state_calls: AtomicUsize,
        sync_chunk_calls: AtomicUsize,
        note_download_calls: AtomicUsize,
        resource_download_calls: AtomicUsize,
        shared_auth_calls: AtomicUsize,
    }

    impl MockNoteStoreClient {
        /// Creates an empty fake: no chunks, watermark zero.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Sets the account scope's sync state.
        pub fn set_sync_state(&self, sync_state: ServerSyncState) {
            self.state.lock().unwrap().sync_state = sync_state;
        }

        /// Sets the account scope's chunk sequence.
        pub fn set_chunks(&self, chunks: Vec<SyncChunk>) {
            self.state.lock().unwrap().chunks = chunks;
        }

        /// Sets one linked notebook's sync state and chunk sequence.
        pub fn set_linked_notebook(
            &self,
            guid: Guid,
            sync_state: ServerSyncState,
            chunks: Vec<SyncChunk>,
        ) {
            let mut state = self.state.lock().unwrap();
            state.linked_sync_states.insert(guid, sync_state);
            state.linked_chunks.insert(guid, chunks);
        }

        /// Stores a full note body served by `note_with_content`.
        pub fn put_note_content(&self, note: Note) {
            if let Some(guid) = note.guid {
                self.state.lock().unwrap().notes.insert(guid, note);
            }
        }

        /// Stores a full resource body served by `resource_with_data`.
        pub fn put_resource_data(&self, resource: Resource) {
            if let Some(guid) = resource.guid {
                self.state.lock().unwrap().resources.insert(guid, resource);
            }
        }

        /// Makes every download of this note fail with a network error.
        pub fn fail_note_download(&self, guid: Guid) {
            self.state.lock().unwrap().failing_notes.insert(guid);
        }

        /// Makes every download of this resource fail with a network error.
        pub fn fail_resource_download(&self, guid: Guid) {
            self.state.lock().unwrap().failing_resources.insert(guid);
        }

        pub fn sync_state_calls(&self) -> usize {
            self.sync_state_calls.load(Ordering::SeqCst)
        }

        pub fn sync_chunk_calls(&self) -> usize {
            self.sync_chunk_calls.load(Ordering::SeqCst)
        }

        pub fn note_download_calls(&self) -> usize {
            self.note_download_calls.load(Ordering::SeqCst)
        }

        pub fn resource_download_calls(&self) -> usize {
            self.resource_download_calls.load(Ordering::SeqCst)
        }

        pub fn shared_auth_calls(&self) -> usize {
            self.shared_auth_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NoteStoreClient for MockNoteStoreClient {
        async fn sync_state(&self, _auth: &AuthenticationInfo) -> SyncResult<ServerSyncState> {
            self.sync_state_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.state.lock().unwrap().sync_state)
        }

        async fn sync_chunk(
            &self,
            after_usn: Usn,
            _max_entries: u32,
            _filter: &SyncChunkFilter,
            _auth: &AuthenticationInfo,
        ) -> SyncResult<SyncChunk> {
            self.sync_chunk_calls.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            Ok(select_chunk(
                &state.chunks,
                after_usn,
                state.sync_state.update_count,
            ))
        }

        async fn linked_notebook_sync_state(
            &self,
            linked_notebook: &LinkedNotebook,
            _auth: &AuthenticationInfo,
        ) -> SyncResult<ServerSyncState> {
            let guid = linked_notebook
                .guid
                .ok_or_else(|| SyncError::Network("linked notebook without guid".to_string()))?;
            let state = self.state.lock().unwrap();
            state
                .linked_sync_states
                .get(&guid)
                .copied()
                .ok_or_else(|| SyncError::Network(format!("unknown linked notebook {guid}")))
        }

        async fn linked_notebook_sync_chunk(
            &self,
            linked_notebook: &LinkedNotebook,
            after_usn: Usn,
            _max_entries: u32,
            _full_sync_only: bool,
            _auth: &AuthenticationInfo,
        ) -> SyncResult<SyncChunk> {
            let guid = linked_notebook
                .guid
                .ok_or_else(|| SyncError::Network("linked notebook without guid".to_string()))?;
            let state = self.state.lock().unwrap();
            let chunks = state
                .linked_chunks
                .get(&guid)
                .ok_or_else(|| SyncError::Network(format!("unknown linked notebook {guid}")))?;
            let update_count = state
                .linked_sync_states
                .get(&guid)
                .map_or(Usn::ZERO, |s| s.update_count);
            Ok(select_chunk(chunks, after_usn, update_count))
        }

        async fn authenticate_to_shared_notebook(
            &self,
            linked_notebook: &LinkedNotebook,
            account_auth: &AuthenticationInfo,
        ) -> SyncResult<AuthenticationInfo> {
            self.shared_auth_calls.fetch_add(1, Ordering::SeqCst);
            let guid = linked_notebook
                .guid
                .ok_or_else(|| SyncError::Auth("linked notebook without guid".to_string()))?;
            Ok(AuthenticationInfo {
                user_id: account_auth.user_id,
                auth_token: format!("linked-token-{guid}"),
                shard_id: linked_notebook
                    .shard_id
                    .clone()
                    .unwrap_or_else(|| account_auth.shard_id.clone()),
                note_store_url: linked_notebook
                    .note_store_url
                    .clone()
                    .unwrap_or_else(|| account_auth.note_store_url.clone()),
                web_api_url_prefix: account_auth.web_api_url_prefix.clone(),
                authentication_time: Timestamp::now(),
                expiration_time: account_auth.expiration_time,
                cookies: Vec::new(),
            })
        }

        async fn note_with_content(
            &self,
            guid: &Guid,
            _auth: &AuthenticationInfo,
        ) -> SyncResult<Note> {
            self.note_download_calls.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            if state.failing_notes.contains(guid) {
                return Err(SyncError::Network(format!("failed to download note {guid}")));
            }
            if let Some(note) = state.notes.get(guid) {
                return Ok(note.clone());
            }
            let mut note = find_note_metadata(&state.chunks, guid)
                .or_else(|| {
                    state
                        .linked_chunks
                        .values()
                        .find_map(|chunks| find_note_metadata(chunks, guid))
                })
                .ok_or_else(|| SyncError::Network(format!("unknown note {guid}")))?;
            note.content = Some(format!("<note>{}</note>", note.title));
            Ok(note)
        }

        async fn resource_with_data(
            &self,
            guid: &Guid,
            _auth: &AuthenticationInfo,
        ) -> SyncResult<Resource> {
            self.resource_download_calls.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            if state.failing_resources.contains(guid) {
                return Err(SyncError::Network(format!(
                    "failed to download resource {guid}"
                )));
            }
            if let Some(resource) = state.resources.get(guid) {
                return Ok(resource.clone());
            }
            let mut resource = find_resource_metadata(&state.chunks, guid)
                .or_else(|| {
                    state
                        .linked_chunks
                        .values()
                        .find_map(|chunks| find_resource_metadata(chunks, guid))
                })
                .ok_or_else(|| SyncError::Network(format!("unknown resource {guid}")))?;
            resource.data = Some(guid.to_string().into_bytes());
            Ok(resource)
        }
    }

    /// A scriptable account authenticator counting its network round trips.
    pub struct MockAuthenticator {
        info: Mutex<AuthenticationInfo>,
        failing: Mutex<bool>,
        calls: AtomicUsize,
    }

    impl MockAuthenticator {
        /// Creates an authenticator that always returns `info`.
        #[must_use]
        pub fn new(info: AuthenticationInfo) -> Self {
            Self {
                info: Mutex::new(info),
                failing: Mutex::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        /// Replaces the returned credentials.
        pub fn set_info(&self, info: AuthenticationInfo) {
            *self.info.lock().unwrap() = info;
        }

        /// Makes subsequent authentications fail.
        pub fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        /// Number of network authentications performed.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for MockAuthenticator {
        async fn authenticate(&self, account: &Account) -> SyncResult<AuthenticationInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.failing.lock().unwrap() {
                return Err(SyncError::Auth(format!(
                    "authentication rejected for {}",
                    account.name
                )));
            }
            Ok(self.info.lock().unwrap().clone())
        }
    }
}
