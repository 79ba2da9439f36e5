//! Core constants for the contactless bridge.
//!
//! Defaults for the peer-to-peer link layer (LLCP), discovery timing,
//! application-facing error codes and property identifiers. Values that come
//! from the link-layer protocol itself (default MIU, SAP ranges) must not be
//! changed without matching firmware support.
//!
//! # Usage
//!
//! ```
//! use nfclink_core::constants::*;
//!
//! // Working buffer needed by a connection-oriented socket
//! let miu = LLCP_MIU_DEFAULT as usize;
//! let size = working_buffer_len(miu, 2, 1000);
//! assert_eq!(size, 1384);
//!
//! // Deinit bound
//! use std::time::Duration;
//! let timeout = Duration::from_millis(DEFAULT_DEINIT_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 10);
//! ```

// ============================================================================
// Peer-to-peer Link Parameters
// ============================================================================

/// Default Maximum Information Unit of the link layer.
///
/// Also used as the receive capacity of connectionless sockets, whose MIU is
/// never negotiated per socket.
pub const LLCP_MIU_DEFAULT: u16 = 128;

/// Default link timeout advertised to the remote peer.
pub const LLCP_LTO_DEFAULT: u8 = 150;

/// Default well-known service bitmap (only the link management service).
pub const LLCP_WKS_DEFAULT: u16 = 0x0001;

/// Default link option byte.
pub const LLCP_OPT_DEFAULT: u8 = 0;

/// Highest valid Service Access Point.
pub const LLCP_SAP_MAX: u8 = 63;

/// Size of the working buffer a connection-oriented socket hands to the driver.
///
/// The driver keeps `rw` frames of `miu` bytes for retransmission, one frame
/// for the frame being received, and a linear buffer for reassembly:
/// `(miu * rw) + miu + linear_buffer_len`.
///
/// # Examples
///
/// ```
/// use nfclink_core::constants::working_buffer_len;
///
/// assert_eq!(working_buffer_len(128, 2, 1000), 1384);
/// assert_eq!(working_buffer_len(128, 0, 0), 128);
/// ```
#[must_use]
pub const fn working_buffer_len(miu: usize, rw: usize, linear_buffer_len: usize) -> usize {
    (miu * rw) + miu + linear_buffer_len
}

// ============================================================================
// Discovery
// ============================================================================

/// Polling loop duration used when reader mode is enabled (milliseconds).
pub const DEFAULT_DISCOVERY_DURATION_MS: u32 = 300_000;

/// Polling loop duration written into the stop configuration.
pub const DISCOVERY_DURATION_STOPPED: u32 = 0xFFFF_FFFF;

/// Number of discovery modes tracked by the mode state table.
pub const DISCOVERY_MODE_COUNT: usize = 3;

// ============================================================================
// Remote Targets
// ============================================================================

/// Response capacity of a transceive exchange with a tag or peer.
pub const TRANSCEIVE_BUFFER_LEN: usize = 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// Upper bound on the driver deinit callback before a forced reset (milliseconds).
pub const DEFAULT_DEINIT_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Application Error Codes
// ============================================================================

/// Stable code reported for a driver "buffer too small" status.
pub const ERROR_BUFFER_TOO_SMALL: i32 = -12;

/// Stable code reported for a driver "insufficient resources" status.
pub const ERROR_INSUFFICIENT_RESOURCES: i32 = -9;

// ============================================================================
// Property Identifiers
// ============================================================================

pub const PROPERTY_LLCP_LTO: i32 = 0;
pub const PROPERTY_LLCP_MIU: i32 = 1;
pub const PROPERTY_LLCP_WKS: i32 = 2;
pub const PROPERTY_LLCP_OPT: i32 = 3;
pub const PROPERTY_DISCOVERY_A: i32 = 4;
pub const PROPERTY_DISCOVERY_B: i32 = 5;
pub const PROPERTY_DISCOVERY_F: i32 = 6;
pub const PROPERTY_DISCOVERY_15693: i32 = 7;
pub const PROPERTY_DISCOVERY_NFCIP: i32 = 8;

// ============================================================================
// Target Type Names
// ============================================================================

pub const TARGET_TYPE_ISO14443: &str = "Iso14443";
pub const TARGET_TYPE_MIFARE_UL: &str = "MifareUL";
pub const TARGET_TYPE_MIFARE_1K: &str = "Mifare1K";
pub const TARGET_TYPE_MIFARE_4K: &str = "Mifare4K";
pub const TARGET_TYPE_MIFARE_DESFIRE: &str = "MifareDESFIRE";
pub const TARGET_TYPE_MIFARE_UNKNOWN: &str = "Unknown Mifare";
pub const TARGET_TYPE_FELICA: &str = "Felica";
pub const TARGET_TYPE_JEWEL: &str = "Jewel";
pub const TARGET_TYPE_UNKNOWN: &str = "Unknown Type";
