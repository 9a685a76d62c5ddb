//! Exclusive-run guard
//!
//! At most one sync pass or migration runs at a time. Timer ticks and manual
//! calls only ever try the guard; migration waits for it.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Shared mutual-exclusion guard around "a sync pass is running"
#[derive(Clone, Default)]
pub struct SyncGuard {
    lock: Arc<Mutex<()>>,
}

/// Proof that the holder owns the guard; released on drop
pub struct SyncPermit {
    _guard: OwnedMutexGuard<()>,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard if nobody holds it
    pub fn try_acquire(&self) -> Option<SyncPermit> {
        self.lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| SyncPermit { _guard: guard })
    }

    /// Wait until the guard is free
    pub async fn acquire(&self) -> SyncPermit {
        SyncPermit {
            _guard: self.lock.clone().lock_owned().await,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
