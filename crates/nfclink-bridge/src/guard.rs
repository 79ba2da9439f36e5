//! Serialization guards around the driver.
//!
//! Two locks protect a session:
//!
//! - the **reentrancy guard** is held around every driver entry point and
//!   around every callback the dispatch thread runs. It is reentrant because
//!   callbacks may call back into the driver.
//! - the **caller guard** is held by a public session operation for its
//!   whole duration, so at most one of them is in flight. Socket operations
//!   only take the reentrancy guard.
//!
//! The caller guard is never taken on the dispatch thread, and the
//! reentrancy guard is never held across a wait.

use nfclink_core::NfcStatus;
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, warn};

/// Both session guards.
#[derive(Debug, Default)]
pub struct Guards {
    reentrancy: ReentrantMutex<()>,
    caller: Mutex<()>,
}

impl Guards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the reentrancy guard until the returned guard drops.
    pub fn enter_driver(&self) -> ReentrantMutexGuard<'_, ()> {
        self.reentrancy.lock()
    }

    /// Hold the caller guard until the returned guard drops.
    pub fn enter_caller(&self) -> MutexGuard<'_, ()> {
        self.caller.lock()
    }

    /// Check whether some public operation currently holds the caller guard.
    #[cfg(test)]
    pub fn caller_busy(&self) -> bool {
        self.caller.is_locked()
    }
}

/// Log the immediate result of issuing a driver request.
pub fn log_issue(operation: &str, status: NfcStatus) {
    if status.is_success() || status.is_pending() {
        debug!("{}() returned {}", operation, status);
    } else {
        warn!("{}() returned {}", operation, status);
    }
}

/// Log the status delivered to a driver callback.
pub fn log_completion(operation: &str, status: NfcStatus) {
    if status.is_success() {
        debug!("{} callback: {}", operation, status);
    } else {
        warn!("{} callback: {}", operation, status);
    }
}
