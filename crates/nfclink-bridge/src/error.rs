//! Error types for bridge operations.
//!
//! Every public operation reports failure through [`BridgeError`]. Variants
//! follow how the failure surfaced: refused by the driver when issued,
//! reported non-success by the callback, or a wait that ended without a
//! result.

use std::time::Duration;

use nfclink_core::NfcStatus;

use crate::lifecycle::LifecycleState;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while driving the contactless stack.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The driver refused the request outright.
    #[error("{operation} rejected by driver: {status}")]
    Rejected {
        operation: &'static str,
        status: NfcStatus,
    },

    /// The driver accepted the request but its callback reported failure.
    #[error("{operation} failed: {status}")]
    Failed {
        operation: &'static str,
        status: NfcStatus,
    },

    /// A bounded wait expired before the callback arrived.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The wait was cancelled by another thread.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// The session is not in a state that allows the operation.
    #[error("Session not ready (state: {state})")]
    NotReady { state: LifecycleState },

    /// No peer has been discovered, so there is no link to act on.
    #[error("No peer link available")]
    NoPeerLink,

    /// The socket was closed explicitly or by link loss.
    #[error("Socket closed")]
    SocketClosed,

    /// The socket is not in a state that allows the operation.
    #[error("Socket operation {operation} not allowed in state {state}")]
    InvalidSocketState {
        operation: &'static str,
        state: String,
    },

    /// The tag's NDEF area must be checked before it can be read.
    #[error("NDEF area of {0} not checked")]
    NdefNotChecked(nfclink_driver::types::RemoteHandle),

    /// The discovery mode cannot be enabled on its own.
    #[error("Discovery mode {0} cannot be enabled directly")]
    UnsupportedDiscoveryMode(String),

    /// The dispatch thread could not be spawned.
    #[error("Failed to start dispatch thread: {0}")]
    DispatcherSpawn(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] nfclink_core::Error),
}

impl BridgeError {
    pub fn rejected(operation: &'static str, status: NfcStatus) -> Self {
        Self::Rejected { operation, status }
    }

    pub fn failed(operation: &'static str, status: NfcStatus) -> Self {
        Self::Failed { operation, status }
    }

    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Driver status carried by the error, if any.
    pub fn status(&self) -> Option<NfcStatus> {
        match self {
            Self::Rejected { status, .. } | Self::Failed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check whether the error came from a wait that ended without a result.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
