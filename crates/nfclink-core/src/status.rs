//! Driver status codes.
//!
//! Every driver entry point and every driver callback reports an [`NfcStatus`].
//! The two values that matter for control flow are [`NfcStatus::SUCCESS`]
//! (the operation finished synchronously) and [`NfcStatus::PENDING`] (the
//! operation was accepted and its real result will arrive through a callback).
//! Everything else is a failure of some kind.
//!
//! Statuses render with their raw code and symbolic name so log lines can be
//! matched against driver traces:
//!
//! ```
//! use nfclink_core::NfcStatus;
//!
//! assert_eq!(NfcStatus::PENDING.to_string(), "0x000d[NFCSTATUS_PENDING]");
//! assert!(NfcStatus::PENDING.is_pending());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{ERROR_BUFFER_TOO_SMALL, ERROR_INSUFFICIENT_RESOURCES};

/// Raw status code returned by the contactless driver stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NfcStatus(u16);

impl NfcStatus {
    pub const SUCCESS: NfcStatus = NfcStatus(0x0000);
    pub const INVALID_PARAMETER: NfcStatus = NfcStatus(0x0001);
    pub const BUFFER_TOO_SMALL: NfcStatus = NfcStatus(0x0003);
    pub const INVALID_DEVICE: NfcStatus = NfcStatus(0x0006);
    pub const RF_TIMEOUT: NfcStatus = NfcStatus(0x0009);
    pub const RF_ERROR: NfcStatus = NfcStatus(0x000A);
    pub const INSUFFICIENT_RESOURCES: NfcStatus = NfcStatus(0x000C);
    pub const PENDING: NfcStatus = NfcStatus(0x000D);
    pub const BOARD_COMMUNICATION_ERROR: NfcStatus = NfcStatus(0x000F);
    pub const INVALID_STATE: NfcStatus = NfcStatus(0x0011);
    pub const NOT_INITIALISED: NfcStatus = NfcStatus(0x0031);
    pub const ALREADY_INITIALISED: NfcStatus = NfcStatus(0x0032);
    pub const FEATURE_NOT_SUPPORTED: NfcStatus = NfcStatus(0x0033);
    pub const NOT_REGISTERED: NfcStatus = NfcStatus(0x0034);
    pub const ALREADY_REGISTERED: NfcStatus = NfcStatus(0x0035);
    pub const MULTIPLE_PROTOCOLS: NfcStatus = NfcStatus(0x0036);
    pub const MULTIPLE_TAGS: NfcStatus = NfcStatus(0x0037);
    pub const SHUTDOWN: NfcStatus = NfcStatus(0x0091);
    pub const TARGET_LOST: NfcStatus = NfcStatus(0x0092);
    pub const REJECTED: NfcStatus = NfcStatus(0x0093);
    pub const TARGET_NOT_CONNECTED: NfcStatus = NfcStatus(0x0094);
    pub const INVALID_HANDLE: NfcStatus = NfcStatus(0x0095);
    pub const ABORTED: NfcStatus = NfcStatus(0x0096);
    pub const COMMAND_NOT_SUPPORTED: NfcStatus = NfcStatus(0x0097);
    pub const NOT_ALLOWED: NfcStatus = NfcStatus(0x00E0);
    pub const DESELECTED: NfcStatus = NfcStatus(0x00FC);
    pub const FAILED: NfcStatus = NfcStatus(0x00FF);

    /// Wrap a raw driver code.
    #[must_use]
    pub const fn from_raw(code: u16) -> Self {
        NfcStatus(code)
    }

    /// The raw driver code.
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        *self == NfcStatus::SUCCESS
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        *self == NfcStatus::PENDING
    }

    /// Symbolic name of the status, `"UNKNOWN"` for codes outside the table.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match *self {
            NfcStatus::SUCCESS => "NFCSTATUS_SUCCESS",
            NfcStatus::INVALID_PARAMETER => "NFCSTATUS_INVALID_PARAMETER",
            NfcStatus::BUFFER_TOO_SMALL => "NFCSTATUS_BUFFER_TOO_SMALL",
            NfcStatus::INVALID_DEVICE => "NFCSTATUS_INVALID_DEVICE",
            NfcStatus::RF_TIMEOUT => "NFCSTATUS_RF_TIMEOUT",
            NfcStatus::RF_ERROR => "NFCSTATUS_RF_ERROR",
            NfcStatus::INSUFFICIENT_RESOURCES => "NFCSTATUS_INSUFFICIENT_RESOURCES",
            NfcStatus::PENDING => "NFCSTATUS_PENDING",
            NfcStatus::BOARD_COMMUNICATION_ERROR => "NFCSTATUS_BOARD_COMMUNICATION_ERROR",
            NfcStatus::INVALID_STATE => "NFCSTATUS_INVALID_STATE",
            NfcStatus::NOT_INITIALISED => "NFCSTATUS_NOT_INITIALISED",
            NfcStatus::ALREADY_INITIALISED => "NFCSTATUS_ALREADY_INITIALISED",
            NfcStatus::FEATURE_NOT_SUPPORTED => "NFCSTATUS_FEATURE_NOT_SUPPORTED",
            NfcStatus::NOT_REGISTERED => "NFCSTATUS_NOT_REGISTERED",
            NfcStatus::ALREADY_REGISTERED => "NFCSTATUS_ALREADY_REGISTERED",
            NfcStatus::MULTIPLE_PROTOCOLS => "NFCSTATUS_MULTIPLE_PROTOCOLS",
            NfcStatus::MULTIPLE_TAGS => "NFCSTATUS_MULTIPLE_TAGS",
            NfcStatus::SHUTDOWN => "NFCSTATUS_SHUTDOWN",
            NfcStatus::TARGET_LOST => "NFCSTATUS_TARGET_LOST",
            NfcStatus::REJECTED => "NFCSTATUS_REJECTED",
            NfcStatus::TARGET_NOT_CONNECTED => "NFCSTATUS_TARGET_NOT_CONNECTED",
            NfcStatus::INVALID_HANDLE => "NFCSTATUS_INVALID_HANDLE",
            NfcStatus::ABORTED => "NFCSTATUS_ABORTED",
            NfcStatus::COMMAND_NOT_SUPPORTED => "NFCSTATUS_COMMAND_NOT_SUPPORTED",
            NfcStatus::NOT_ALLOWED => "NFCSTATUS_NOT_ALLOWED",
            NfcStatus::DESELECTED => "NFCSTATUS_DESELECTED",
            NfcStatus::FAILED => "NFCSTATUS_FAILED",
            _ => "UNKNOWN",
        }
    }
}

impl Default for NfcStatus {
    fn default() -> Self {
        NfcStatus::FAILED
    }
}

impl fmt::Display for NfcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}[{}]", self.0, self.name())
    }
}

impl From<u16> for NfcStatus {
    fn from(code: u16) -> Self {
        NfcStatus(code)
    }
}

/// Map a driver status onto the code reported to the application.
///
/// Only two statuses have stable application constants; every other status
/// is passed through as its raw code.
///
/// ```
/// use nfclink_core::{NfcStatus, normalize_error};
///
/// assert_eq!(normalize_error(NfcStatus::BUFFER_TOO_SMALL), -12);
/// assert_eq!(normalize_error(NfcStatus::FAILED), 0xFF);
/// ```
#[must_use]
pub fn normalize_error(status: NfcStatus) -> i32 {
    match status {
        NfcStatus::BUFFER_TOO_SMALL => ERROR_BUFFER_TOO_SMALL,
        NfcStatus::INSUFFICIENT_RESOURCES => ERROR_INSUFFICIENT_RESOURCES,
        other => i32::from(other.code()),
    }
}
