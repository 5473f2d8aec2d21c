//! Sync-state records, remote and persisted.

use crate::timestamp::Timestamp;
use crate::usn::Usn;
use serde::{Deserialize, Serialize};

/// The service's answer to a sync-state query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSyncState {
    /// Service wall-clock time when the state was produced.
    pub current_time: Timestamp,
    /// Clients whose last full sync predates this must run a full sync again.
    pub full_sync_before: Timestamp,
    /// The scope's current high watermark.
    pub update_count: Usn,
}

/// The locally persisted record of the last completed sync of one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateRecord {
    /// Highest USN fully applied to local storage.
    pub last_sync_usn: Usn,
    /// Service time at which that sync completed.
    pub last_sync_time: Timestamp,
    /// The `full_sync_before` the service reported during that sync.
    pub full_sync_before: Timestamp,
}
