//! Wall-clock timestamps in service time.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in time as milliseconds since the Unix epoch.
///
/// The service reports all times in epoch milliseconds (`current_time`,
/// `full_sync_before`, credential expiration); local entities carry the same
/// representation so comparisons never need a conversion step.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Returns the timestamp as epoch milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns this timestamp moved `millis` into the past, saturating at
    /// the representable minimum.
    #[must_use]
    pub const fn saturating_sub_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_sub(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
