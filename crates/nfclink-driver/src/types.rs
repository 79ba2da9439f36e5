//! Value types exchanged with the contactless driver stack.
//!
//! This module defines handles, discovery and registration configuration,
//! peer-to-peer link parameters and the descriptions of remote devices the
//! driver reports during polling.

use nfclink_core::constants::{
    DEFAULT_DISCOVERY_DURATION_MS, DISCOVERY_DURATION_STOPPED, LLCP_LTO_DEFAULT, LLCP_MIU_DEFAULT,
    LLCP_OPT_DEFAULT, LLCP_WKS_DEFAULT, TARGET_TYPE_FELICA, TARGET_TYPE_ISO14443,
    TARGET_TYPE_JEWEL, TARGET_TYPE_MIFARE_1K, TARGET_TYPE_MIFARE_4K, TARGET_TYPE_MIFARE_DESFIRE,
    TARGET_TYPE_MIFARE_UL, TARGET_TYPE_MIFARE_UNKNOWN, TARGET_TYPE_UNKNOWN,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a remote device (tag or peer) reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle(pub u32);

/// Handle of a logical link-layer socket owned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketHandle(pub u32);

/// Handle of a secure element attached to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecureElementHandle(pub u32);

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::Display for SecureElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Physical link between the host and the contactless controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LinkType {
    /// Serial port `COM1` .. `COM8`.
    Com(u8),
    I2c,
    Usb,
    /// Port name not recognized; the driver picks its own default.
    #[default]
    Undefined,
}

impl LinkType {
    /// Parse the device port property (`"COM1"`..`"COM8"`, `"I2C"`, `"USB"`).
    ///
    /// Anything else maps to [`LinkType::Undefined`].
    ///
    /// # Examples
    ///
    /// ```
    /// use nfclink_driver::types::LinkType;
    ///
    /// assert_eq!(LinkType::from_port_name("COM3"), LinkType::Com(3));
    /// assert_eq!(LinkType::from_port_name("I2C"), LinkType::I2c);
    /// assert_eq!(LinkType::from_port_name("COM9"), LinkType::Undefined);
    /// ```
    pub fn from_port_name(name: &str) -> Self {
        match name {
            "I2C" => LinkType::I2c,
            "USB" => LinkType::Usb,
            _ => name
                .strip_prefix("COM")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=8).contains(n))
                .map_or(LinkType::Undefined, LinkType::Com),
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::Com(n) => write!(f, "COM{n}"),
            LinkType::I2c => write!(f, "I2C"),
            LinkType::Usb => write!(f, "USB"),
            LinkType::Undefined => write!(f, "UNDEFINED"),
        }
    }
}

/// Hardware configuration handed to the driver before initialization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Physical link to the controller.
    pub link_type: LinkType,
}

/// Peer negotiation mode used while polling for NFC-IP devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerMode {
    /// Driver default negotiation.
    #[default]
    Default,
    Passive106,
    Passive212,
    Passive424,
    Active,
    All,
}

/// Per-technology polling enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technologies {
    pub iso14443a: bool,
    pub iso14443b: bool,
    pub felica212: bool,
    pub felica424: bool,
    pub iso15693: bool,
    /// NFC-IP active mode polling.
    pub nfc_active: bool,
}

impl Default for Technologies {
    fn default() -> Self {
        Self {
            iso14443a: true,
            iso14443b: true,
            felica212: true,
            felica424: true,
            iso15693: true,
            nfc_active: true,
        }
    }
}

/// Discovery (polling loop) configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Polling loop duration in milliseconds.
    pub duration_ms: u32,

    /// Technologies polled for.
    pub technologies: Technologies,

    /// Suppress card emulation while polling.
    pub disable_card_emulation: bool,

    /// Peer negotiation mode.
    pub peer_mode: PeerMode,

    /// Polling loop switched off entirely.
    pub polling_disabled: bool,

    /// Do not answer as an NFC-IP target.
    pub nfcip_target_disabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            duration_ms: DEFAULT_DISCOVERY_DURATION_MS,
            technologies: Technologies::default(),
            disable_card_emulation: false,
            peer_mode: PeerMode::Default,
            polling_disabled: false,
            nfcip_target_disabled: false,
        }
    }
}

impl DiscoveryConfig {
    /// Configuration that stops the polling loop.
    pub fn stopped(&self) -> Self {
        Self {
            duration_ms: DISCOVERY_DURATION_STOPPED,
            peer_mode: PeerMode::Default,
            polling_disabled: true,
            nfcip_target_disabled: true,
            ..*self
        }
    }
}

/// What a discovery configuration request asks the driver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryAction {
    /// Apply the configuration and (re)start polling.
    Config,
    /// Resume polling with the current configuration after a disconnect.
    Resume,
}

/// Remote device families reported to a notification handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Registration {
    pub mifare_ul: bool,
    pub mifare_std: bool,
    pub iso14443_4a: bool,
    pub iso14443_4b: bool,
    pub jewel: bool,
    pub felica: bool,
    pub iso15693: bool,
    /// NFC-IP peers.
    pub nfc: bool,
}

impl Registration {
    /// Every family used by reader mode.
    pub fn all() -> Self {
        Self {
            mifare_ul: true,
            mifare_std: true,
            iso14443_4a: true,
            iso14443_4b: true,
            jewel: true,
            felica: true,
            iso15693: false,
            nfc: true,
        }
    }

    /// Peers only.
    pub fn peers() -> Self {
        Self {
            nfc: true,
            ..Self::default()
        }
    }

    /// Tags only.
    pub fn tags() -> Self {
        Self {
            nfc: false,
            ..Self::all()
        }
    }
}

/// Peer-to-peer link (LLCP) parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParameters {
    /// Maximum Information Unit.
    pub miu: u16,
    /// Link timeout.
    pub lto: u8,
    /// Well-known service bitmap.
    pub wks: u16,
    /// Link option byte.
    pub option: u8,
}

impl Default for LinkParameters {
    fn default() -> Self {
        Self {
            miu: LLCP_MIU_DEFAULT,
            lto: LLCP_LTO_DEFAULT,
            wks: LLCP_WKS_DEFAULT,
            option: LLCP_OPT_DEFAULT,
        }
    }
}

impl fmt::Display for LinkParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LTO={} MIU={} WKS=0x{:04x} OPT=0x{:02x}",
            self.lto, self.miu, self.wks, self.option
        )
    }
}

/// Transport kind of a link-layer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketKind {
    /// Datagram socket, destination SAP per send.
    Connectionless,
    /// Flow-controlled byte stream.
    ConnectionOriented,
}

/// Flow-control options of a connection-oriented socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SocketOptions {
    pub miu: u16,
    /// Receive window.
    pub rw: u8,
}

/// Link status reported by the standing link-status handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkStatus {
    Activated,
    Deactivated,
}

/// Reason carried by a disconnected-mode answer to a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    SapNotActive,
    SapNotFound,
    ConnectRejected,
    ConnectNotAccepted,
    SocketNotAvailable,
}

impl DisconnectReason {
    /// Decode a disconnected-mode reason byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::SapNotActive),
            0x02 => Some(Self::SapNotFound),
            0x03 => Some(Self::ConnectRejected),
            0x20 => Some(Self::ConnectNotAccepted),
            0x21 => Some(Self::SocketNotAvailable),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SapNotActive => "SAP_NOT_ACTIVE",
            Self::SapNotFound => "SAP_NOT_FOUND",
            Self::ConnectRejected => "CONNECT_REJECTED",
            Self::ConnectNotAccepted => "CONNECT_NOT_ACCEPTED",
            Self::SocketNotAvailable => "SOCKET_NOT_AVAILABLE",
        }
    }
}

/// Error reported by a socket's standing error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketError {
    FrameRejected,
    Disconnected,
}

impl SocketError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FrameRejected => "FRAME_REJECTED",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

/// Remote device families as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RemoteDeviceType {
    Iso14443A,
    Iso14443B,
    Iso14443_4A,
    Iso14443_4B,
    Mifare,
    Felica,
    Jewel,
    Iso15693,
    /// Remote peer initiated the link; we are the target.
    NfcIp1Initiator,
    /// Remote peer answers as a target; we are the initiator.
    NfcIp1Target,
    Unknown,
}

impl RemoteDeviceType {
    /// Check whether the device is an NFC-IP peer rather than a tag.
    pub fn is_peer(&self) -> bool {
        matches!(self, Self::NfcIp1Initiator | Self::NfcIp1Target)
    }
}

/// Classification of a discovered tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    Iso14443,
    MifareUltralight,
    Mifare1K,
    Mifare4K,
    MifareDesfire,
    MifareUnknown,
    Felica,
    Jewel,
    Unknown,
}

impl TargetType {
    /// Classify a remote device from its type and select acknowledge byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use nfclink_driver::types::{RemoteDeviceType, TargetType};
    ///
    /// assert_eq!(TargetType::classify(RemoteDeviceType::Mifare, 0x08), TargetType::Mifare1K);
    /// assert_eq!(TargetType::classify(RemoteDeviceType::Iso14443_4A, 0x20), TargetType::Iso14443);
    /// ```
    pub fn classify(device_type: RemoteDeviceType, sak: u8) -> Self {
        match device_type {
            RemoteDeviceType::Iso14443A
            | RemoteDeviceType::Iso14443B
            | RemoteDeviceType::Iso14443_4A
            | RemoteDeviceType::Iso14443_4B => TargetType::Iso14443,
            RemoteDeviceType::Mifare => match sak {
                0x00 => TargetType::MifareUltralight,
                0x08 => TargetType::Mifare1K,
                0x18 => TargetType::Mifare4K,
                0x20 => TargetType::MifareDesfire,
                _ => TargetType::MifareUnknown,
            },
            RemoteDeviceType::Felica => TargetType::Felica,
            RemoteDeviceType::Jewel => TargetType::Jewel,
            _ => TargetType::Unknown,
        }
    }

    /// Name reported to the application.
    pub fn name(&self) -> &'static str {
        match self {
            TargetType::Iso14443 => TARGET_TYPE_ISO14443,
            TargetType::MifareUltralight => TARGET_TYPE_MIFARE_UL,
            TargetType::Mifare1K => TARGET_TYPE_MIFARE_1K,
            TargetType::Mifare4K => TARGET_TYPE_MIFARE_4K,
            TargetType::MifareDesfire => TARGET_TYPE_MIFARE_DESFIRE,
            TargetType::MifareUnknown => TARGET_TYPE_MIFARE_UNKNOWN,
            TargetType::Felica => TARGET_TYPE_FELICA,
            TargetType::Jewel => TARGET_TYPE_JEWEL,
            TargetType::Unknown => TARGET_TYPE_UNKNOWN,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Framing of a transceive payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransceiveCommand {
    /// Mifare command byte and block address, carried outside the payload.
    Mifare { command: u8, address: u8 },
    /// Payload sent as is (ISO 14443-4, FeliCa, Jewel, peers).
    Raw,
}

impl TransceiveCommand {
    /// Split an application frame for a tag of `target_type`.
    ///
    /// Mifare classic and Ultralight frames carry the command and address in
    /// their first two bytes. Returns `None` for a Mifare frame shorter than
    /// that.
    ///
    /// # Examples
    ///
    /// ```
    /// use nfclink_driver::types::{TargetType, TransceiveCommand};
    ///
    /// let (command, payload) = TransceiveCommand::frame(TargetType::Mifare1K, &[0x30, 0x04]).unwrap();
    /// assert_eq!(command, TransceiveCommand::Mifare { command: 0x30, address: 0x04 });
    /// assert!(payload.is_empty());
    ///
    /// let (command, payload) = TransceiveCommand::frame(TargetType::Felica, &[0x06, 0x01]).unwrap();
    /// assert_eq!(command, TransceiveCommand::Raw);
    /// assert_eq!(payload, &[0x06, 0x01]);
    /// ```
    pub fn frame(target_type: TargetType, data: &[u8]) -> Option<(Self, &[u8])> {
        match target_type {
            TargetType::Mifare1K | TargetType::Mifare4K | TargetType::MifareUltralight => {
                match data {
                    [command, address, payload @ ..] => Some((
                        TransceiveCommand::Mifare {
                            command: *command,
                            address: *address,
                        },
                        payload,
                    )),
                    _ => None,
                }
            }
            _ => Some((TransceiveCommand::Raw, data)),
        }
    }
}

/// Remote device as reported by a discovery notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDevice {
    /// Driver handle of the device.
    pub handle: RemoteHandle,

    /// Device family.
    pub device_type: RemoteDeviceType,

    /// UID (tags) or NFCID3 (peers).
    pub uid: Vec<u8>,

    /// Select acknowledge byte, meaningful for Mifare tags.
    pub sak: u8,

    /// ATR general bytes, present when the remote device is an initiator.
    pub general_bytes: Vec<u8>,
}

impl RemoteDevice {
    pub fn new(handle: RemoteHandle, device_type: RemoteDeviceType) -> Self {
        Self {
            handle,
            device_type,
            uid: Vec::new(),
            sak: 0,
            general_bytes: Vec::new(),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<Vec<u8>>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn with_sak(mut self, sak: u8) -> Self {
        self.sak = sak;
        self
    }

    pub fn with_general_bytes(mut self, general_bytes: impl Into<Vec<u8>>) -> Self {
        self.general_bytes = general_bytes.into();
        self
    }
}

/// Kind of secure element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecureElementKind {
    SmartMx,
    Uicc,
}

/// Secure element reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureElement {
    pub handle: SecureElementHandle,
    pub kind: SecureElementKind,
}

/// Routing mode of a secure element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecureElementMode {
    Off,
    /// Reachable from the RF field (card emulation).
    Virtual,
    /// Reachable from the host only.
    Wired,
}

/// Versions reported by the driver stack and controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StackCapabilities {
    pub hal_version: u32,
    pub firmware_version: u32,
    pub hardware_version: u32,
    pub model_id: u32,
    pub hci_version: u32,
}

impl fmt::Display for StackCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HAL=0x{:x} FW=0x{:x} HW=0x{:x} Model=0x{:x} HCI=0x{:x}",
            self.hal_version,
            self.firmware_version,
            self.hardware_version,
            self.model_id,
            self.hci_version
        )
    }
}
