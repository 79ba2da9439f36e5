//! Integration tests for session bring-up, teardown and recovery.

mod common;

use std::thread;
use std::time::Duration;

use common::{eventually, fixture, peer, ready};
use nfclink_bridge::{BridgeError, DiscoveryMode, LifecycleState, Property, Teardown};
use nfclink_core::NfcStatus;
use nfclink_core::constants::ERROR_BUFFER_TOO_SMALL;
use nfclink_driver::mock::{Behavior, MockOp};
use nfclink_driver::types::{DiscoveryAction, LinkParameters, Registration};
use rstest::rstest;

#[rstest]
#[case::graceful(Behavior::Complete(NfcStatus::SUCCESS), Teardown::Graceful)]
#[case::timeout(Behavior::Hold, Teardown::ForcedReset)]
#[case::refused(Behavior::Reject(NfcStatus::BOARD_COMMUNICATION_ERROR), Teardown::ForcedReset)]
#[case::failed(Behavior::Complete(NfcStatus::FAILED), Teardown::ForcedReset)]
fn test_deinitialize_always_succeeds(#[case] behavior: Behavior, #[case] expected: Teardown) {
    let fixture = ready();
    fixture.handle.set_behavior(MockOp::Deinitialize, behavior);

    assert_eq!(fixture.session.deinitialize(), expected);
    assert_eq!(fixture.session.lifecycle_state(), LifecycleState::Uninitialized);
    assert!(!fixture.handle.is_configured());
    assert_eq!(
        fixture.handle.count(MockOp::Reset),
        usize::from(expected == Teardown::ForcedReset)
    );
}

#[test]
fn test_reinitialize_after_deinitialize() {
    let fixture = ready();
    fixture.session.deinitialize();
    fixture.session.initialize().unwrap();

    assert_eq!(fixture.session.lifecycle_state(), LifecycleState::Ready);
    assert_eq!(fixture.handle.count(MockOp::Initialize), 2);
}

#[test]
fn test_refused_request_does_not_wait() {
    let fixture = fixture();
    fixture
        .handle
        .set_behavior(MockOp::Initialize, Behavior::Reject(NfcStatus::INVALID_STATE));

    let started = std::time::Instant::now();
    let err = fixture.session.initialize().unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(err, BridgeError::Rejected { operation: "initialize", .. }));
    assert_eq!(fixture.session.last_status(), NfcStatus::INVALID_STATE);
}

#[test]
fn test_last_error_is_normalized() {
    let fixture = ready();
    fixture.handle.set_behavior(
        MockOp::SetSecureElementMode,
        Behavior::Complete(NfcStatus::BUFFER_TOO_SMALL),
    );
    let handle = nfclink_driver::types::SecureElementHandle(1);
    assert!(fixture.session.select_secure_element(handle).is_err());

    assert_eq!(fixture.session.last_status(), NfcStatus::BUFFER_TOO_SMALL);
    assert_eq!(fixture.session.last_error(), ERROR_BUFFER_TOO_SMALL);
}

#[test]
fn test_operations_require_ready_session() {
    let fixture = fixture();
    let err = fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::NotReady {
            state: LifecycleState::Uninitialized
        }
    ));
    assert!(fixture.handle.calls().is_empty());
}

#[test]
fn test_recovery_restores_discovery() {
    let fixture = ready();
    let session = &fixture.session;
    session.set_property(Property::DiscoveryA, 1);
    session.set_property(Property::DiscoveryB, 1);
    session.set_property(Property::DiscoveryF, 1);
    session.set_property(Property::Discovery15693, 0);
    session.set_property(Property::LlcpLto, 100);
    session.set_property(Property::LlcpMiu, 128);
    session.set_property(Property::LlcpWks, 1);
    session.set_property(Property::LlcpOpt, 0);
    session.enable_discovery(DiscoveryMode::TagReader).unwrap();

    let before = session.discovery_config();
    let registration = fixture.handle.registration();

    fixture
        .handle
        .set_behavior_once(MockOp::ConfigureDiscovery, Behavior::Reject(NfcStatus::FAILED));
    session.resume_discovery().unwrap();

    assert_eq!(session.recovery_count(), 1);
    assert_eq!(session.lifecycle_state(), LifecycleState::Ready);
    assert_eq!(session.discovery_config(), before);
    assert_eq!(
        fixture.handle.last_discovery(),
        Some((DiscoveryAction::Config, before))
    );
    assert_eq!(fixture.handle.registration(), registration);
    assert_eq!(
        fixture.handle.link_parameters(),
        Some(LinkParameters {
            lto: 100,
            miu: 128,
            wks: 1,
            option: 0,
        })
    );
    assert_eq!(fixture.handle.count(MockOp::Initialize), 2);
    assert!(session.is_discovery_mode_enabled(DiscoveryMode::TagReader));
}

#[test]
fn test_recovery_keeps_open_registration() {
    let fixture = ready();
    let handle = fixture.handle.clone();
    let discover = thread::spawn(move || {
        assert!(eventually(|| handle.count(MockOp::RegisterNotification) == 1));
        handle.discover(vec![peer(9)]);
    });
    fixture
        .session
        .open_peer_connection(Duration::from_secs(2))
        .unwrap();
    discover.join().unwrap();

    fixture
        .handle
        .set_behavior_once(MockOp::ConfigureDiscovery, Behavior::Reject(NfcStatus::FAILED));
    fixture.session.resume_discovery().unwrap();

    assert_eq!(fixture.session.recovery_count(), 1);
    assert_eq!(fixture.handle.registration(), Some(Registration::peers()));
}

#[test]
fn test_failed_recovery_leaves_session_uninitialized() {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();

    fixture
        .handle
        .set_behavior_once(MockOp::ConfigureDiscovery, Behavior::Reject(NfcStatus::FAILED));
    fixture
        .handle
        .set_behavior(MockOp::Initialize, Behavior::Complete(NfcStatus::SHUTDOWN));

    assert!(fixture.session.resume_discovery().is_err());
    assert_eq!(
        fixture.session.lifecycle_state(),
        LifecycleState::Uninitialized
    );
    assert!(!fixture.handle.is_configured());
    assert_eq!(fixture.session.recovery_count(), 0);
}
