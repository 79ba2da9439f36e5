//! Discovered targets handed to the application.

use std::fmt;

use chrono::{DateTime, Utc};
use nfclink_driver::types::{RemoteDevice, RemoteDeviceType, RemoteHandle, TargetType};
use serde::{Deserialize, Serialize};

/// Role of the remote peer in the NFC-IP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum P2pMode {
    /// The remote device answered our polling as a target.
    Target = 0,
    /// The remote device polled us.
    Initiator = 1,
}

/// A tag found by the polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfcTag {
    pub handle: RemoteHandle,
    pub uid: Vec<u8>,
    pub target_type: TargetType,
    pub discovered_at: DateTime<Utc>,
}

impl NfcTag {
    /// UID as upper-case hex.
    pub fn uid_hex(&self) -> String {
        self.uid.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

impl fmt::Display for NfcTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tag {} ({})", self.target_type, self.uid_hex(), self.handle)
    }
}

/// A peer-to-peer capable device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pDevice {
    pub handle: RemoteHandle,
    pub mode: P2pMode,
    /// ATR general bytes; only populated for initiators.
    pub general_bytes: Vec<u8>,
    pub discovered_at: DateTime<Utc>,
}

/// Either kind of discovered target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveredTarget {
    Tag(NfcTag),
    Peer(P2pDevice),
}

impl DiscoveredTarget {
    /// Build the application view of a remote device.
    pub fn from_remote(device: &RemoteDevice) -> Self {
        let discovered_at = Utc::now();
        match device.device_type {
            RemoteDeviceType::NfcIp1Initiator => DiscoveredTarget::Peer(P2pDevice {
                handle: device.handle,
                mode: P2pMode::Initiator,
                general_bytes: device.general_bytes.clone(),
                discovered_at,
            }),
            RemoteDeviceType::NfcIp1Target => DiscoveredTarget::Peer(P2pDevice {
                handle: device.handle,
                mode: P2pMode::Target,
                general_bytes: Vec::new(),
                discovered_at,
            }),
            device_type => DiscoveredTarget::Tag(NfcTag {
                handle: device.handle,
                uid: device.uid.clone(),
                target_type: TargetType::classify(device_type, device.sak),
                discovered_at,
            }),
        }
    }

    pub fn handle(&self) -> RemoteHandle {
        match self {
            DiscoveredTarget::Tag(tag) => tag.handle,
            DiscoveredTarget::Peer(peer) => peer.handle,
        }
    }

    pub fn is_peer(&self) -> bool {
        matches!(self, DiscoveredTarget::Peer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_initiator_keeps_general_bytes() {
        let device = RemoteDevice::new(RemoteHandle(7), RemoteDeviceType::NfcIp1Initiator)
            .with_general_bytes(vec![0x46, 0x66, 0x6d]);

        match DiscoveredTarget::from_remote(&device) {
            DiscoveredTarget::Peer(peer) => {
                assert_eq!(peer.mode, P2pMode::Initiator);
                assert_eq!(peer.general_bytes, vec![0x46, 0x66, 0x6d]);
            }
            other => panic!("expected peer, got {other:?}"),
        }
    }

    #[test]
    fn test_target_drops_general_bytes() {
        let device = RemoteDevice::new(RemoteHandle(7), RemoteDeviceType::NfcIp1Target)
            .with_general_bytes(vec![1, 2]);

        let target = DiscoveredTarget::from_remote(&device);
        assert!(target.is_peer());
        match target {
            DiscoveredTarget::Peer(peer) => {
                assert_eq!(peer.mode, P2pMode::Target);
                assert!(peer.general_bytes.is_empty());
            }
            other => panic!("expected peer, got {other:?}"),
        }
    }

    #[rstest]
    #[case(RemoteDeviceType::Mifare, 0x08, TargetType::Mifare1K)]
    #[case(RemoteDeviceType::Mifare, 0x00, TargetType::MifareUltralight)]
    #[case(RemoteDeviceType::Felica, 0x00, TargetType::Felica)]
    fn test_tag_classification(
        #[case] device_type: RemoteDeviceType,
        #[case] sak: u8,
        #[case] expected: TargetType,
    ) {
        let device = RemoteDevice::new(RemoteHandle(1), device_type)
            .with_uid(vec![0x04, 0xa2])
            .with_sak(sak);

        match DiscoveredTarget::from_remote(&device) {
            DiscoveredTarget::Tag(tag) => {
                assert_eq!(tag.target_type, expected);
                assert_eq!(tag.uid_hex(), "04A2");
                assert_eq!(tag.handle, RemoteHandle(1));
            }
            other => panic!("expected tag, got {other:?}"),
        }
    }
}
