//! Local storage interface for Vellum.
//!
//! The sync engine reads and writes local data exclusively through the
//! [`LocalStorage`] trait defined here. The trait covers what synchronization
//! needs (per-kind find/put/expunge, guid listings filtered by local flags,
//! and linked-notebook enumeration) and nothing else; queries, search and
//! schema belong to the embedding application.
//!
//! [`MemoryStorage`] is a complete in-memory implementation used throughout
//! the test suites.

mod error;
mod local;
mod memory;

pub use error::{StorageError, StorageResult};
pub use local::{EntityKind, GuidFilter, LocalStorage};
pub use memory::MemoryStorage;
