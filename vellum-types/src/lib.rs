//! Core type definitions for Vellum.
//!
//! This crate defines the fundamental, transport-agnostic types used
//! throughout the sync engine:
//! - Guid / local id / user id identifiers
//! - Update sequence numbers and epoch-millisecond timestamps
//! - Entity models (notebooks, tags, saved searches, notes, resources,
//!   linked notebooks)
//! - Sync chunks and sync-state records
//! - Accounts and authentication results
//!
//! Everything here is plain data: no I/O, no storage, no protocol code.
//! Those belong to `vellum-storage` and `vellum-sync`.

mod auth;
mod chunk;
mod entities;
mod ids;
mod sync_state;
mod timestamp;
mod usn;

pub use auth::{Account, AuthCookie, AuthenticationInfo};
pub use chunk::{SyncChunk, SyncChunkFilter};
pub use entities::{
    LinkedNotebook, Note, Notebook, NotebookPublishing, NotebookRestrictions, Resource,
    SavedSearch, Tag,
};
pub use ids::{Guid, LocalId, UserId};
pub use sync_state::{ServerSyncState, SyncStateRecord};
pub use timestamp::Timestamp;
pub use usn::Usn;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
