//! Entity models synchronized between local storage and the service.
//!
//! Every synchronized entity carries both identities: the server-assigned
//! `guid` (absent until the entity has been uploaded once) and the
//! client-assigned `local_id` (present from birth, stable across guid
//! changes). `locally_modified` marks unsynchronized local edits; the clean
//! server copy of an entity always arrives with it unset.

use crate::ids::{Guid, LocalId};
use crate::timestamp::Timestamp;
use crate::usn::Usn;
use serde::{Deserialize, Serialize};

/// A notebook, the container notes live in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub usn: Option<Usn>,
    pub name: String,
    /// Whether this is the account's default notebook.
    pub default_notebook: bool,
    /// Guid of the linked notebook this notebook was shared through, if any.
    pub linked_notebook_guid: Option<Guid>,
    /// Server-imposed restrictions; never meaningful on a local-only notebook.
    pub restrictions: Option<NotebookRestrictions>,
    /// Public-publishing settings; server-owned.
    pub publishing: Option<NotebookPublishing>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub locally_modified: bool,
    pub locally_favorited: bool,
}

/// What the service forbids the current user to do with a notebook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookRestrictions {
    pub no_read_notes: bool,
    pub no_create_notes: bool,
    pub no_update_notes: bool,
    pub no_expunge_notebook: bool,
}

/// Public-publishing settings of a notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookPublishing {
    pub uri: Option<String>,
    pub description: Option<String>,
}

/// A tag. Tags form a forest through the parent linkage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub usn: Option<Usn>,
    pub name: String,
    pub parent_guid: Option<Guid>,
    pub parent_local_id: Option<LocalId>,
    /// Guid of the linked notebook this tag belongs to, if any.
    pub linked_notebook_guid: Option<Guid>,
    pub locally_modified: bool,
    pub locally_favorited: bool,
}

/// A saved search. Saved searches exist only in the account's own scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub usn: Option<Usn>,
    pub name: String,
    pub query: String,
    pub locally_modified: bool,
    pub locally_favorited: bool,
}

/// A note.
///
/// Sync chunks carry note metadata only; `content` is filled in by a separate
/// per-note download before the note is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub usn: Option<Usn>,
    pub title: String,
    pub content: Option<String>,
    pub notebook_guid: Option<Guid>,
    pub notebook_local_id: Option<LocalId>,
    pub tag_guids: Vec<Guid>,
    pub tag_local_ids: Vec<LocalId>,
    pub resources: Vec<Resource>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub locally_modified: bool,
    pub locally_favorited: bool,
}

/// A binary attachment of a note.
///
/// Incremental sync chunks list changed resources on their own; their bodies
/// are filled in by a separate per-resource download. In full syncs resources
/// arrive embedded in their notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub usn: Option<Usn>,
    pub note_guid: Option<Guid>,
    pub note_local_id: Option<LocalId>,
    pub mime: Option<String>,
    pub data: Option<Vec<u8>>,
    pub locally_modified: bool,
}

/// A foreign notebook shared into this account.
///
/// Linked notebooks synchronize under their own USN watermark, against the
/// shard named here, with their own authentication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedNotebook {
    pub guid: Option<Guid>,
    pub usn: Option<Usn>,
    pub share_name: Option<String>,
    /// Name of the user who owns the shared notebook.
    pub username: Option<String>,
    pub shard_id: Option<String>,
    /// Global identifier of the share grant; presented when authenticating.
    pub shared_notebook_global_id: Option<String>,
    pub note_store_url: Option<String>,
    pub web_api_url_prefix: Option<String>,
}
