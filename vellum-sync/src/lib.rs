//! Incremental download engine for Vellum accounts.
//!
//! Synchronization is driven by update sequence numbers (USNs): every
//! mutation on the service bumps a per-scope counter, and a client that
//! remembers the highest USN it has fully processed can ask for everything
//! after it. This crate implements the download side of that contract for
//! the account's own data and for every linked notebook shared into it.
//!
//! # Architecture
//!
//! A download run is a pipeline per scope: fetch sync chunks, apply their
//! metadata, download note and resource content item by item, then persist
//! the new watermark. Content downloads go through a durable journal so an
//! interrupted run resumes instead of starting over.
//!
//! ## Components
//!
//! - **Chunks**: Paginated retrieval of sync chunks with watermark checks
//! - **Processors**: Apply metadata and download note/resource content
//! - **Journal**: Durable per-item outcomes, the backbone of resumption
//! - **Expunger**: Removes stale local data after a full sync
//! - **Auth**: Layered credential acquisition and caching per scope
//! - **Downloader**: Orchestrates all of the above across scopes
//!
//! ## Download Process
//!
//! 1. **Authenticate**: Resolve credentials from cache, disk or network
//! 2. **Decide**: Pick initial full, forced full or incremental per scope
//! 3. **Fetch**: Page sync chunks until the server's update count is reached
//! 4. **Apply**: Write metadata, then download notes and resources durably
//! 5. **Clean**: After a forced full run, expunge or rebirth stale rows
//! 6. **Persist**: Record the new watermark, but only for completed scopes
//!
//! # Example
//!
//! ```
//! use vellum_sync::{CancellationToken, DownloaderConfig};
//! use vellum_types::{Account, UserId};
//!
//! let account = Account::new(UserId::new(4815), "owner", "www.vellum.example");
//! let config = DownloaderConfig::new("sync/journal");
//! let cancel = CancellationToken::new();
//! ```

pub mod auth;
mod cancel;
pub mod chunks;
pub mod client;
mod downloader;
mod error;
pub mod expunger;
pub mod journal;
mod observer;
pub mod processors;
pub mod state_store;
mod status;

pub use cancel::CancellationToken;
pub use downloader::{
    DownloadResult, DownloaderConfig, ScopeOutcome, ScopeSummary, SyncDownloader, SyncMode,
};
pub use error::{SyncError, SyncResult};
pub use observer::{NullObserver, SyncObserver};
pub use status::{DownloadStatus, MetadataCounters};

pub use auth::{
    AuthMode, AuthProviderConfig, AuthenticationInfoProvider, ClearAuthCaches, KeyringSecretStore,
    MemorySecretStore, MemorySettingsStore, SecretStore, SettingsStore,
};
pub use chunks::{ChunkProgress, SyncChunksDownloader};
pub use client::{Authenticator, NoteStoreClient};
pub use expunger::{FullSyncStaleDataExpunger, PreservedGuids};
pub use journal::DownloadJournal;
pub use processors::{
    DownloadCallback, DownloadItem, DurableProcessor, ItemProcessor, MetadataEntity,
    MetadataProcessor, NotesProcessor, NullCallback, ResourcesProcessor,
};
pub use state_store::{FileSyncStateStore, MemorySyncStateStore, SyncScope, SyncStateStore};
