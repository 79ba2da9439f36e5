//! Shared fixtures for the bridge integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nfclink_bridge::{DiscoveryMode, Session, SessionConfig, SessionEvents};
use nfclink_driver::mock::{MockDriver, MockDriverHandle};
use nfclink_driver::types::{RemoteDevice, RemoteDeviceType, RemoteHandle};

pub struct Fixture {
    pub session: Session,
    pub events: SessionEvents,
    pub handle: MockDriverHandle,
}

/// An uninitialized session on a fresh mock driver.
pub fn fixture() -> Fixture {
    let (driver, handle) = MockDriver::new();
    let config = SessionConfig::default().with_deinit_timeout(Duration::from_millis(200));
    let (session, events) = Session::new(Arc::new(driver), config);
    Fixture {
        session,
        events,
        handle,
    }
}

/// A session that is ready to use.
pub fn ready() -> Fixture {
    let fixture = fixture();
    fixture.session.initialize().unwrap();
    fixture
}

/// A ready session with an activated peer link to `RemoteHandle(9)`.
pub fn linked() -> Fixture {
    let fixture = ready();
    fixture
        .session
        .enable_discovery(DiscoveryMode::TagReader)
        .unwrap();
    assert!(fixture.handle.discover(vec![peer(9)]));
    assert!(fixture.handle.flush());
    fixture.session.check_link_compliance().unwrap();
    fixture.session.activate_link().unwrap();
    fixture
}

pub fn tag(handle: u32, uid: &[u8]) -> RemoteDevice {
    RemoteDevice::new(RemoteHandle(handle), RemoteDeviceType::Mifare)
        .with_uid(uid.to_vec())
        .with_sak(0x08)
}

pub fn peer(handle: u32) -> RemoteDevice {
    RemoteDevice::new(RemoteHandle(handle), RemoteDeviceType::NfcIp1Initiator)
        .with_uid(vec![0x01, 0xfe, 0x00, 0x11])
        .with_general_bytes(vec![0x46, 0x66, 0x6d])
}

/// Poll `condition` until it holds or a second has passed.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
