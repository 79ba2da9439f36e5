//! Integration tests for link-layer sockets.

mod common;

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use common::{eventually, linked, ready};
use nfclink_bridge::{BridgeError, SessionEvent, SocketState};
use nfclink_core::NfcStatus;
use nfclink_driver::mock::{Behavior, MockOp};
use nfclink_driver::types::{DisconnectReason, LinkStatus, SocketKind, SocketOptions};

#[test]
fn test_service_socket_accepts_connection() {
    let fixture = ready();
    let mut server = fixture
        .session
        .create_service_socket(0x20, "urn:nfc:sn:snep", 128, 2, 1000)
        .unwrap();
    assert_eq!(server.state(), SocketState::Listening);

    let listening = fixture.handle.socket(server.handle()).unwrap();
    assert_eq!(listening.working_buffer_len, 1384);
    assert_eq!(listening.sap, Some(0x20));
    assert_eq!(listening.service_name.as_deref(), Some("urn:nfc:sn:snep"));

    let incoming = fixture.handle.incoming_connection(server.handle()).unwrap();
    let mut socket = server
        .accept(Duration::from_secs(1), 128, 1, 0)
        .unwrap();
    assert_eq!(socket.handle(), incoming);
    assert_eq!(socket.state(), SocketState::Connected);
    assert_eq!(fixture.handle.socket(incoming).unwrap().working_buffer_len, 256);

    socket.send(b"ping").unwrap();
    let sent = fixture.handle.sent();
    assert_eq!(sent.last().map(|frame| frame.data.as_slice()), Some(&b"ping"[..]));

    fixture.handle.push_inbound(incoming, 0x20, b"pong".to_vec());
    let mut buf = [0u8; 16];
    let len = socket.receive(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"pong");
}

#[test]
fn test_accept_times_out_without_incoming() {
    let fixture = ready();
    let mut server = fixture
        .session
        .create_service_socket(0x20, "urn:nfc:sn:snep", 128, 1, 0)
        .unwrap();

    let err = server
        .accept(Duration::from_millis(20), 128, 1, 0)
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(server.state(), SocketState::Listening);
}

#[test]
fn test_failed_accept_closes_incoming() {
    let fixture = ready();
    let mut server = fixture
        .session
        .create_service_socket(0x20, "urn:nfc:sn:snep", 128, 1, 0)
        .unwrap();
    let incoming = fixture.handle.incoming_connection(server.handle()).unwrap();
    fixture
        .handle
        .set_behavior(MockOp::Accept, Behavior::Complete(NfcStatus::INSUFFICIENT_RESOURCES));

    assert!(server.accept(Duration::from_secs(1), 128, 1, 0).is_err());
    assert!(fixture.handle.socket(incoming).is_none());
    assert_eq!(fixture.handle.open_sockets(), 1);
}

#[test]
fn test_bind_failure_leaves_nothing_open() {
    let fixture = ready();
    fixture
        .handle
        .set_behavior(MockOp::Bind, Behavior::Reject(NfcStatus::INVALID_PARAMETER));

    let err = fixture.session.create_connectionless_socket(0x10).err().unwrap();
    assert_eq!(err.status(), Some(NfcStatus::INVALID_PARAMETER));
    assert!(
        fixture
            .session
            .create_service_socket(0x20, "urn:nfc:sn:snep", 128, 1, 0)
            .is_err()
    );
    assert_eq!(fixture.handle.open_sockets(), 0);
    assert_eq!(fixture.handle.count(MockOp::Close), 2);
}

#[test]
fn test_listen_failure_closes_socket() {
    let fixture = ready();
    fixture
        .handle
        .set_behavior(MockOp::Listen, Behavior::Reject(NfcStatus::ALREADY_REGISTERED));

    assert!(
        fixture
            .session
            .create_service_socket(0x20, "urn:nfc:sn:snep", 128, 1, 0)
            .is_err()
    );
    assert_eq!(fixture.handle.open_sockets(), 0);
}

#[test]
fn test_client_socket_binds_only_with_sap() {
    let fixture = ready();
    let anonymous = fixture.session.create_socket(0, 128, 1, 0).unwrap();
    assert_eq!(anonymous.state(), SocketState::Unbound);
    assert_eq!(fixture.handle.count(MockOp::Bind), 0);

    let bound = fixture.session.create_socket(0x21, 248, 4, 512).unwrap();
    assert_eq!(bound.state(), SocketState::Bound);
    assert_eq!(bound.working_buffer_len(), 248 * 4 + 248 + 512);
    assert_eq!(
        fixture.handle.socket(bound.handle()).unwrap().options,
        Some(SocketOptions { miu: 248, rw: 4 })
    );
}

#[test]
fn test_connect_waits_without_bound() {
    let fixture = ready();
    fixture.handle.set_behavior(
        MockOp::Connect,
        Behavior::Delayed(Duration::from_millis(50), NfcStatus::SUCCESS),
    );
    let mut socket = fixture.session.create_socket(0, 128, 1, 0).unwrap();

    socket.connect(0x20, Duration::ZERO).unwrap();
    assert_eq!(socket.state(), SocketState::Connected);
}

#[test]
fn test_connect_timeout_then_retry() {
    let fixture = ready();
    fixture.handle.set_behavior(
        MockOp::ConnectByName,
        Behavior::Delayed(Duration::from_millis(300), NfcStatus::SUCCESS),
    );
    let mut socket = fixture.session.create_socket(0x21, 128, 1, 0).unwrap();

    let err = socket
        .connect_by_name("urn:nfc:sn:snep", Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Timeout {
            operation: "connect_by_name",
            timeout_ms: 20
        }
    ));
    assert_eq!(socket.state(), SocketState::Bound);

    fixture.handle.set_behavior(
        MockOp::ConnectByName,
        Behavior::Complete(NfcStatus::SUCCESS),
    );
    socket
        .connect_by_name("urn:nfc:sn:snep", Duration::from_secs(1))
        .unwrap();
    assert_eq!(socket.state(), SocketState::Connected);
}

#[test]
fn test_refused_connect_restores_state() {
    let fixture = ready();
    fixture
        .handle
        .set_behavior(MockOp::Connect, Behavior::Complete(NfcStatus::FAILED));
    fixture
        .handle
        .set_connect_refusal(Some(DisconnectReason::SapNotFound));
    let mut socket = fixture.session.create_socket(0, 128, 1, 0).unwrap();

    let err = socket.connect(0x30, Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, BridgeError::Failed { .. }));
    assert_eq!(socket.state(), SocketState::Unbound);
    assert!(matches!(
        socket.send(b"x"),
        Err(BridgeError::InvalidSocketState { .. })
    ));
}

#[test]
fn test_connectionless_exchange() {
    let fixture = ready();
    let mut socket = fixture.session.create_connectionless_socket(0x10).unwrap();
    assert_eq!(socket.link_miu(), 128);
    assert_eq!(
        fixture.handle.socket(socket.handle()).unwrap().kind,
        SocketKind::Connectionless
    );

    socket.send_to(0x20, &[0x01, 0x02]).unwrap();
    let frame = fixture.handle.sent().pop().unwrap();
    assert_eq!(frame.sap, Some(0x20));
    assert_eq!(frame.data, vec![0x01, 0x02]);

    fixture.handle.push_inbound(socket.handle(), 0x21, vec![0x03; 4]);
    let (sap, data) = socket.receive().unwrap();
    assert_eq!(sap, 0x21);
    assert_eq!(data, vec![0x03; 4]);
}

#[test]
fn test_close_is_idempotent() {
    let fixture = ready();
    let mut socket = fixture.session.create_socket(0x21, 128, 1, 0).unwrap();

    socket.close().unwrap();
    socket.close().unwrap();
    assert_eq!(socket.state(), SocketState::Closed);
    assert_eq!(fixture.handle.count(MockOp::Close), 1);
    assert!(matches!(socket.send(b"x"), Err(BridgeError::SocketClosed)));
}

#[test]
fn test_drop_closes_socket() {
    let fixture = ready();
    let socket = fixture.session.create_connectionless_socket(0x10).unwrap();
    assert_eq!(fixture.handle.open_sockets(), 1);

    drop(socket);
    assert_eq!(fixture.handle.open_sockets(), 0);
}

#[test]
fn test_remote_options() {
    let fixture = ready();
    fixture
        .handle
        .set_remote_options(SocketOptions { miu: 512, rw: 7 });
    let socket = fixture.session.create_socket(0x21, 128, 1, 0).unwrap();
    assert_eq!(socket.remote_miu(), 512);
    assert_eq!(socket.remote_rw(), 7);

    fixture.handle.set_behavior(
        MockOp::RemoteSocketOptions,
        Behavior::Reject(NfcStatus::INVALID_STATE),
    );
    assert_eq!(socket.remote_miu(), 0);
    assert_eq!(socket.remote_rw(), 0);
}

#[test]
fn test_link_deactivation_closes_sockets() {
    let mut fixture = linked();
    let mut socket = fixture.session.create_socket(0x21, 128, 1, 0).unwrap();

    assert!(fixture.handle.link_status(LinkStatus::Deactivated));
    assert!(fixture.handle.flush());

    assert_eq!(socket.state(), SocketState::Closed);
    assert!(matches!(socket.send(b"x"), Err(BridgeError::SocketClosed)));
    drop(socket);
    assert_eq!(fixture.handle.count(MockOp::Close), 0);

    let mut saw_deactivation = false;
    while let Some(event) = fixture.events.try_recv() {
        saw_deactivation |= event == SessionEvent::LinkDeactivated;
    }
    assert!(saw_deactivation);
}

#[test]
fn test_pending_receive_leaves_session_usable() {
    let fixture = linked();
    fixture.handle.set_behavior(MockOp::ReceiveFrom, Behavior::Hold);
    let session = Arc::new(fixture.session);

    let mut listener = session.create_connectionless_socket(0x30).unwrap();
    let receiver = thread::spawn(move || listener.receive_from(128));
    assert!(eventually(|| fixture.handle.held(MockOp::ReceiveFrom) == 1));

    let (tx, rx) = mpsc::channel();
    let other = Arc::clone(&session);
    thread::spawn(move || {
        let sent = other
            .create_connectionless_socket(0x31)
            .and_then(|mut socket| socket.send_to(0x10, b"hi"));
        tx.send(sent.is_ok()).ok();
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(true));
    assert!(session.resume_discovery().is_ok());

    assert!(fixture.handle.release(MockOp::ReceiveFrom, NfcStatus::SUCCESS));
    let (_, data) = receiver.join().unwrap().unwrap();
    assert!(data.is_empty());
}

#[test]
fn test_link_deactivation_wakes_blocked_sockets() {
    let fixture = linked();
    fixture.handle.set_behavior(MockOp::Receive, Behavior::Hold);
    let mut server = fixture
        .session
        .create_service_socket(0x20, "urn:nfc:sn:snep", 128, 1, 0)
        .unwrap();
    let mut client = fixture.session.create_socket(0x21, 128, 1, 0).unwrap();
    client.connect(0x10, Duration::from_secs(1)).unwrap();

    let accepting = thread::spawn(move || server.accept(Duration::ZERO, 128, 1, 0).map(|_| ()));
    let receiving = thread::spawn(move || {
        let mut buf = [0u8; 8];
        client.receive(&mut buf).map(|_| ())
    });
    assert!(eventually(|| fixture.handle.held(MockOp::Receive) == 1));
    thread::sleep(Duration::from_millis(20));

    assert!(fixture.handle.link_status(LinkStatus::Deactivated));
    assert!(matches!(accepting.join().unwrap(), Err(BridgeError::SocketClosed)));
    assert!(matches!(receiving.join().unwrap(), Err(BridgeError::SocketClosed)));
}
