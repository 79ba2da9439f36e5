//! Integration tests for discovery, opens and events.

mod common;

use std::thread;
use std::time::Duration;

use common::{eventually, peer, ready, tag};
use nfclink_bridge::{
    BridgeError, DiscoveredTarget, DiscoveryMode, LinkState, P2pMode, SessionEvent,
};
use nfclink_core::NfcStatus;
use nfclink_driver::mock::{Behavior, MockOp};
use nfclink_driver::types::{DiscoveryAction, LinkStatus, Registration, RemoteHandle};

#[test]
fn test_enable_reader_mode_starts_polling() {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();

    assert!(fixture.session.is_discovery_mode_enabled(DiscoveryMode::TagReader));
    assert_eq!(fixture.handle.registration(), Some(Registration::all()));
    assert!(fixture.handle.has_transaction_handler());
    let (action, config) = fixture.handle.last_discovery().unwrap();
    assert_eq!(action, DiscoveryAction::Config);
    assert!(!config.polling_disabled);
    assert!(!config.disable_card_emulation);
}

#[test]
fn test_disable_reader_mode() {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();
    fixture.session.disable_discovery().unwrap();

    assert!(!fixture.session.is_discovery_mode_enabled(DiscoveryMode::TagReader));
    let (_, config) = fixture.handle.last_discovery().unwrap();
    assert!(config.polling_disabled);
}

#[test]
fn test_nfcip_mode_cannot_be_enabled_alone() {
    let fixture = ready();
    let err = fixture
        .session
        .enable_discovery(DiscoveryMode::NfcIp1)
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedDiscoveryMode(_)));
    assert!(!fixture.session.is_discovery_mode_enabled(DiscoveryMode::NfcIp1));
}

#[test]
fn test_card_emulation_registers_transactions() {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::CardEmulation)
        .unwrap();

    assert!(fixture.handle.has_transaction_handler());
    assert_eq!(fixture.handle.count(MockOp::ConfigureDiscovery), 0);
}

#[test]
fn test_open_tag_connection() {
    let fixture = ready();
    let handle = fixture.handle.clone();
    let discover = thread::spawn(move || {
        assert!(eventually(|| handle.count(MockOp::RegisterNotification) == 1));
        handle.discover(vec![tag(4, &[0x04, 0xa1, 0xb2, 0xc3])]);
    });

    let found = fixture
        .session
        .open_tag_connection(Duration::from_secs(2))
        .unwrap();
    discover.join().unwrap();

    assert_eq!(found.handle, RemoteHandle(4));
    assert_eq!(found.uid_hex(), "04A1B2C3");
    assert!(matches!(
        fixture.session.last_target(),
        Some(DiscoveredTarget::Tag(_))
    ));
}

#[test]
fn test_open_times_out() {
    let fixture = ready();
    let err = fixture
        .session
        .open_peer_connection(Duration::from_millis(20))
        .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_cancelled_open_ignores_late_discovery() {
    let fixture = ready();
    let session = std::sync::Arc::new(fixture.session);

    let opener = {
        let session = std::sync::Arc::clone(&session);
        thread::spawn(move || session.open_tag_connection(Duration::ZERO))
    };
    assert!(eventually(|| fixture.handle.count(MockOp::RegisterNotification) == 1));
    assert!(session.cancel());
    assert!(matches!(
        opener.join().unwrap(),
        Err(BridgeError::Cancelled { .. })
    ));

    // The old handler is still registered; its late result is discarded.
    fixture.handle.discover(vec![tag(1, &[0x01])]);
    assert!(fixture.handle.flush());
    assert!(!session.cancel());

    let opener = {
        let session = std::sync::Arc::clone(&session);
        thread::spawn(move || session.open_tag_connection(Duration::from_secs(2)))
    };
    assert!(eventually(|| fixture.handle.count(MockOp::RegisterNotification) == 2));
    fixture.handle.discover(vec![tag(2, &[0x02])]);

    let found = opener.join().unwrap().unwrap();
    assert_eq!(found.handle, RemoteHandle(2));
}

#[test]
fn test_open_peer_connection_and_link() {
    let fixture = ready();
    let handle = fixture.handle.clone();
    let discover = thread::spawn(move || {
        assert!(eventually(|| handle.count(MockOp::RegisterNotification) == 1));
        handle.discover(vec![tag(3, &[0x03]), peer(9)]);
    });

    let device = fixture
        .session
        .open_peer_connection(Duration::from_secs(2))
        .unwrap();
    discover.join().unwrap();
    assert_eq!(device.handle, RemoteHandle(9));
    assert_eq!(device.mode, P2pMode::Initiator);
    assert_eq!(device.general_bytes, vec![0x46, 0x66, 0x6d]);

    fixture.session.check_link_compliance().unwrap();
    fixture.session.activate_link().unwrap();
    assert!(fixture.handle.link_status(LinkStatus::Activated));
    assert!(fixture.handle.flush());
    assert_eq!(fixture.session.link_state(), LinkState::Activated);
    assert_eq!(fixture.handle.count(MockOp::RemoteLinkParameters), 1);
}

#[test]
fn test_link_compliance_completing_synchronously() {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();
    assert!(fixture.handle.discover(vec![peer(9)]));
    assert!(fixture.handle.flush());

    fixture.handle.set_behavior(
        MockOp::CheckLink,
        Behavior::CompleteSynchronously(NfcStatus::SUCCESS),
    );
    fixture.session.check_link_compliance().unwrap();
    fixture.session.activate_link().unwrap();
    assert_eq!(fixture.handle.count(MockOp::CheckLink), 1);
}

#[test]
fn test_open_accepts_multiple_tags_in_field() {
    let mut fixture = ready();
    let handle = fixture.handle.clone();
    let discover = thread::spawn(move || {
        assert!(eventually(|| handle.count(MockOp::RegisterNotification) == 1));
        handle.deselect();
        handle.discover_with(
            NfcStatus::MULTIPLE_TAGS,
            vec![tag(5, &[0x05]), tag(6, &[0x06])],
        );
    });

    let found = fixture
        .session
        .open_tag_connection(Duration::from_secs(2))
        .unwrap();
    discover.join().unwrap();

    assert_eq!(found.handle, RemoteHandle(5));
    assert_eq!(fixture.events.try_recv(), Some(SessionEvent::TargetDeselected));
}

#[test]
fn test_link_compliance_needs_a_peer() {
    let fixture = ready();
    assert!(matches!(
        fixture.session.check_link_compliance(),
        Err(BridgeError::NoPeerLink)
    ));
}

#[test]
fn test_refused_disconnect_resumes_discovery() {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();
    fixture
        .handle
        .set_behavior(MockOp::Disconnect, Behavior::Reject(NfcStatus::TARGET_LOST));

    fixture.session.disconnect_target(RemoteHandle(4)).unwrap();
    let (action, _) = fixture.handle.last_discovery().unwrap();
    assert_eq!(action, DiscoveryAction::Resume);
    assert_eq!(fixture.session.last_status(), NfcStatus::TARGET_LOST);
}

#[test]
fn test_disconnect_waits_for_driver() {
    let fixture = ready();
    fixture.handle.set_behavior(
        MockOp::Disconnect,
        Behavior::Delayed(Duration::from_millis(30), NfcStatus::SUCCESS),
    );
    fixture.session.disconnect_target(RemoteHandle(4)).unwrap();
    assert_eq!(fixture.handle.count(MockOp::ConfigureDiscovery), 0);
}

#[test]
fn test_unknown_property_is_ignored() {
    let fixture = ready();
    let before = fixture.session.discovery_config();
    fixture.session.set_property_raw(42, 1);
    assert_eq!(fixture.session.discovery_config(), before);
}

#[tokio::test]
async fn test_discovery_events() {
    let mut fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();

    fixture.handle.discover(vec![tag(5, &[0xde, 0xad])]);
    fixture.handle.deselect();
    fixture.handle.discover(vec![peer(6)]);
    fixture.handle.transaction(vec![0xa0, 0x00, 0x00, 0x03]);

    match fixture.events.recv().await {
        Some(SessionEvent::TagDiscovered(tag)) => assert_eq!(tag.uid_hex(), "DEAD"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(
        fixture.events.recv().await,
        Some(SessionEvent::TargetDeselected)
    );
    match fixture.events.recv().await {
        Some(SessionEvent::PeerDiscovered(device)) => {
            assert_eq!(device.handle, RemoteHandle(6));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(
        fixture.events.recv().await,
        Some(SessionEvent::Transaction {
            aid: vec![0xa0, 0x00, 0x00, 0x03]
        })
    );
}

#[test]
fn test_corrupt_message_keeps_dispatching() {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();
    assert!(fixture.handle.corrupt("truncated frame"));
    fixture.handle.discover(vec![tag(7, &[0x07])]);
    assert!(fixture.handle.flush());

    assert_eq!(
        fixture.session.last_target().map(|target| target.handle()),
        Some(RemoteHandle(7))
    );
}
