//! Cooperative cancellation.

use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A shared flag checked at every step boundary of a sync run.
///
/// Cancellation is cooperative: in-flight calls are not aborted, no new work
/// is scheduled once the flag is observed, and work already scheduled still
/// completes and reports its outcome. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(SyncError::Cancelled)` once cancellation has been
    /// requested; used with `?` at step boundaries.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
