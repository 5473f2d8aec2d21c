//! Update sequence numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An update sequence number, the service's monotonic per-scope watermark.
///
/// Every mutation the service accepts is assigned the next USN of its scope
/// (the user's own account, or one linked notebook). A client that has applied
/// everything up to USN `n` can ask for "what changed after `n`" and receive
/// exactly the missed mutations.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usn(i64);

impl Usn {
    /// The watermark that opens a full sync: nothing has been seen yet.
    pub const ZERO: Usn = Usn(0);

    /// Creates a USN from its numeric value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Usn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
