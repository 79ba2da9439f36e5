//! Logical link-layer sockets.
//!
//! Three socket types sit on top of the peer link:
//!
//! - [`ConnectionlessSocket`]: datagrams, destination SAP per send;
//! - [`ServiceSocket`]: a named listener that accepts incoming connections;
//! - [`Socket`]: a connection-oriented, flow-controlled byte stream.
//!
//! Every blocking operation issues its request, expects it to be pending
//! and waits for the callback on the caller's thread. Sockets are meant to
//! be driven by one thread at a time. Their operations do not take the
//! session's caller guard, so a receive or accept blocked on the peer
//! leaves the session and other sockets usable.
//!
//! Closing a socket, or losing the link, wakes its blocked operation with
//! [`BridgeError::SocketClosed`]. A socket the application drops without
//! closing is closed on drop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nfclink_core::NfcStatus;
use nfclink_core::constants::{LLCP_MIU_DEFAULT, working_buffer_len};
use nfclink_driver::traits::{ConnectCallback, ListenHandler, SocketErrorHandler};
use nfclink_driver::types::{SocketError, SocketHandle, SocketKind, SocketOptions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::guard::log_completion;
use crate::rendezvous::{Mailbox, Signal, Waiter, bound, completion, rendezvous};
use crate::session::{Session, Shared};

/// Lifecycle of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketState {
    Unbound,
    Bound,
    Listening,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketState::Unbound => "Unbound",
            SocketState::Bound => "Bound",
            SocketState::Listening => "Listening",
            SocketState::Connecting => "Connecting",
            SocketState::Connected => "Connected",
            SocketState::Closed => "Closed",
        };
        write!(f, "{}", name)
    }
}

impl SocketState {
    /// Check if transition to target state is valid from this state.
    pub fn can_transition_to(&self, target: &SocketState) -> bool {
        matches!(
            (self, target),
            // From Unbound (clients with SAP 0 connect without binding)
            (SocketState::Unbound, SocketState::Bound | SocketState::Connecting)
            // From Bound
            | (SocketState::Bound, SocketState::Listening | SocketState::Connecting)
            // From Connecting (a failed connect falls back)
            | (SocketState::Connecting, SocketState::Connected | SocketState::Bound | SocketState::Unbound)
        ) || (*self != SocketState::Closed && *target == SocketState::Closed)
    }
}

type Interrupt = Box<dyn FnOnce() + Send + 'static>;

/// Socket state shared with the session so link loss can close it.
pub(crate) struct SocketCore {
    handle: SocketHandle,
    state: Mutex<SocketState>,
    /// Wakes the operation currently blocked on this socket.
    interrupt: Mutex<Option<Interrupt>>,
    /// Incoming connections of a listener.
    incoming: Option<Arc<Mailbox<SocketHandle>>>,
}

impl SocketCore {
    fn new(handle: SocketHandle, state: SocketState) -> Arc<Self> {
        Arc::new(Self {
            handle,
            state: Mutex::new(state),
            interrupt: Mutex::new(None),
            incoming: None,
        })
    }

    fn listener(handle: SocketHandle, incoming: Arc<Mailbox<SocketHandle>>) -> Arc<Self> {
        Arc::new(Self {
            handle,
            state: Mutex::new(SocketState::Listening),
            interrupt: Mutex::new(None),
            incoming: Some(incoming),
        })
    }

    pub(crate) fn handle(&self) -> SocketHandle {
        self.handle
    }

    fn state(&self) -> SocketState {
        *self.state.lock()
    }

    /// Fail unless the socket is in one of `allowed`.
    fn require(&self, operation: &'static str, allowed: &[SocketState]) -> Result<()> {
        match self.state() {
            SocketState::Closed => Err(BridgeError::SocketClosed),
            state if allowed.contains(&state) => Ok(()),
            state => Err(BridgeError::InvalidSocketState {
                operation,
                state: state.to_string(),
            }),
        }
    }

    /// Move to `to`, returning the state left behind.
    fn transition(&self, operation: &'static str, to: SocketState) -> Result<SocketState> {
        let mut state = self.state.lock();
        let from = *state;
        if from == SocketState::Closed {
            return Err(BridgeError::SocketClosed);
        }
        if !from.can_transition_to(&to) {
            return Err(BridgeError::InvalidSocketState {
                operation,
                state: from.to_string(),
            });
        }
        *state = to;
        Ok(from)
    }

    fn restore(&self, to: SocketState) {
        let mut state = self.state.lock();
        if *state != SocketState::Closed {
            *state = to;
        }
    }

    fn is_closed(&self) -> bool {
        self.state() == SocketState::Closed
    }

    /// Install the wake-up for a blocked operation. Fires at once if the
    /// socket closed in the meantime.
    fn arm(&self, interrupt: Interrupt) {
        *self.interrupt.lock() = Some(interrupt);
        if self.is_closed() {
            self.fire();
        }
    }

    fn disarm(&self) {
        self.interrupt.lock().take();
    }

    fn fire(&self) {
        let interrupt = self.interrupt.lock().take();
        if let Some(interrupt) = interrupt {
            interrupt();
        }
    }

    /// Close and wake whatever is blocked on the socket.
    ///
    /// Returns `false` if the socket was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        let was_open = {
            let mut state = self.state.lock();
            let was_open = *state != SocketState::Closed;
            *state = SocketState::Closed;
            was_open
        };
        if let Some(incoming) = &self.incoming {
            incoming.close();
        }
        self.fire();
        was_open
    }
}

fn socket_error_handler() -> SocketErrorHandler {
    Arc::new(|error: SocketError| match error {
        SocketError::FrameRejected => warn!("Socket error: {}", error.name()),
        SocketError::Disconnected => info!("Socket error: {}", error.name()),
    })
}

fn connect_callback(operation: &'static str, signal: Signal<NfcStatus>) -> ConnectCallback {
    Box::new(move |status, reason| {
        if let Some(reason) = reason {
            warn!("{} refused by peer: {}", operation, reason.name());
        }
        log_completion(operation, status);
        if !signal.complete(status) {
            debug!("{} callback arrived with no live waiter, discarded", operation);
        }
    })
}

impl Shared {
    fn create_socket(
        &self,
        kind: SocketKind,
        options: Option<SocketOptions>,
        working_buffer: Option<Vec<u8>>,
    ) -> Result<SocketHandle> {
        self.query("socket", |driver| {
            driver.socket(kind, options, working_buffer, socket_error_handler())
        })
        .map_err(|status| {
            self.latch(status);
            BridgeError::rejected("socket", status)
        })
    }

    /// Bind a fresh socket, closing it if the bind fails.
    fn bind_or_close(&self, socket: SocketHandle, sap: u8) -> Result<()> {
        let status = self.issue("bind", |driver| driver.bind(socket, sap));
        if !status.is_success() {
            self.latch(status);
            self.close_handle(socket);
            return Err(BridgeError::rejected("bind", status));
        }
        Ok(())
    }

    fn close_handle(&self, socket: SocketHandle) -> NfcStatus {
        self.issue("close", |driver| driver.close(socket))
    }

    fn register_socket(&self, socket: SocketHandle, state: SocketState) -> Arc<SocketCore> {
        let core = SocketCore::new(socket, state);
        self.track_socket(&core);
        core
    }

    fn register_listener(
        &self,
        socket: SocketHandle,
        incoming: Arc<Mailbox<SocketHandle>>,
    ) -> Arc<SocketCore> {
        let core = SocketCore::listener(socket, incoming);
        self.track_socket(&core);
        core
    }

    /// Wait on behalf of `core`. Closing the socket cancels the wait.
    fn wait_socket<T: Send + 'static>(
        &self,
        core: &SocketCore,
        operation: &'static str,
        waiter: Waiter<T>,
        signal: Signal<T>,
        timeout: Option<Duration>,
    ) -> Result<T> {
        core.arm(Box::new(move || {
            signal.cancel();
        }));
        let outcome = self.wait(operation, waiter, timeout);
        core.disarm();
        outcome.map_err(|err| match err {
            BridgeError::Cancelled { .. } if core.is_closed() => BridgeError::SocketClosed,
            err => err,
        })
    }

    /// [`Shared::settle`] for a request made on `core`.
    fn settle_socket(
        &self,
        core: &SocketCore,
        operation: &'static str,
        issued: NfcStatus,
        (waiter, signal): (Waiter<NfcStatus>, Signal<NfcStatus>),
        timeout: Option<Duration>,
    ) -> Result<()> {
        if !issued.is_pending() {
            self.latch(issued);
            return Err(BridgeError::rejected(operation, issued));
        }
        let status = self.wait_socket(core, operation, waiter, signal, timeout)?;
        if !status.is_success() {
            self.latch(status);
            return Err(BridgeError::failed(operation, status));
        }
        Ok(())
    }

    /// Issue a close for an open socket; the handle is gone either way.
    fn close_socket(&self, core: &SocketCore) -> Result<()> {
        if !core.mark_closed() {
            return Ok(());
        }
        let status = self.close_handle(core.handle());
        if !status.is_success() {
            self.latch(status);
            return Err(BridgeError::rejected("close", status));
        }
        Ok(())
    }
}

/// Connectionless socket.
pub struct ConnectionlessSocket {
    session: Arc<Shared>,
    core: Arc<SocketCore>,
    sap: u8,
    link_miu: u16,
}

impl ConnectionlessSocket {
    pub fn handle(&self) -> SocketHandle {
        self.core.handle()
    }

    pub fn sap(&self) -> u8 {
        self.sap
    }

    /// Receive capacity used by [`receive`](Self::receive).
    pub fn link_miu(&self) -> u16 {
        self.link_miu
    }

    pub fn state(&self) -> SocketState {
        self.core.state()
    }

    /// Send one datagram to `sap` on the peer.
    pub fn send_to(&mut self, sap: u8, data: &[u8]) -> Result<()> {
        self.core.require("send_to", &[SocketState::Bound])?;

        let (waiter, signal) = rendezvous();
        let socket = self.core.handle();
        let callback = completion("send_to", signal.clone());
        let status = self.session.issue("send_to", |driver| {
            driver.send_to(socket, sap, data.to_vec(), callback)
        });
        self.session
            .settle_socket(&self.core, "send_to", status, (waiter, signal), None)
    }

    /// Receive one datagram of at most `capacity` bytes.
    ///
    /// Returns the sender SAP and the payload.
    pub fn receive_from(&mut self, capacity: usize) -> Result<(u8, Vec<u8>)> {
        self.core.require("receive_from", &[SocketState::Bound])?;

        let (waiter, signal) = rendezvous();
        let socket = self.core.handle();
        let delivery = signal.clone();
        let status = self.session.issue("receive_from", |driver| {
            driver.receive_from(
                socket,
                capacity,
                Box::new(move |status, sap, data| {
                    log_completion("receive_from", status);
                    delivery.complete((status, sap, data));
                }),
            )
        });
        if !status.is_pending() {
            self.session.latch(status);
            return Err(BridgeError::rejected("receive_from", status));
        }

        let (status, sap, data) =
            self.session
                .wait_socket(&self.core, "receive_from", waiter, signal, None)?;
        if !status.is_success() {
            self.session.latch(status);
            return Err(BridgeError::failed("receive_from", status));
        }
        Ok((sap, data))
    }

    /// Receive one datagram using the link MIU as capacity.
    pub fn receive(&mut self) -> Result<(u8, Vec<u8>)> {
        self.receive_from(usize::from(self.link_miu))
    }

    /// Close the socket. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.session.close_socket(&self.core)
    }
}

impl fmt::Debug for ConnectionlessSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionlessSocket")
            .field("handle", &self.core.handle())
            .field("sap", &self.sap)
            .field("state", &self.core.state())
            .finish()
    }
}

impl Drop for ConnectionlessSocket {
    fn drop(&mut self) {
        if self.session.close_socket(&self.core).is_err() {
            debug!("Close on drop of socket {} failed", self.core.handle());
        }
    }
}

/// Listening socket bound to a service name.
pub struct ServiceSocket {
    session: Arc<Shared>,
    core: Arc<SocketCore>,
    sap: u8,
    service_name: String,
    incoming: Arc<Mailbox<SocketHandle>>,
}

impl ServiceSocket {
    pub fn handle(&self) -> SocketHandle {
        self.core.handle()
    }

    pub fn sap(&self) -> u8 {
        self.sap
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> SocketState {
        self.core.state()
    }

    /// Wait for an incoming connection and accept it.
    ///
    /// A zero timeout waits forever. The accepted socket gets its own
    /// working buffer sized from `miu`, `rw` and `linear_buffer_len`.
    ///
    /// Fails with [`BridgeError::SocketClosed`] if the listener is closed
    /// or the link lost while waiting.
    pub fn accept(
        &mut self,
        timeout: Duration,
        miu: u16,
        rw: u8,
        linear_buffer_len: usize,
    ) -> Result<Socket> {
        self.core.require("accept", &[SocketState::Listening])?;

        let incoming = match self.incoming.take(bound(timeout)) {
            Some(incoming) => incoming,
            None if self.core.is_closed() => return Err(BridgeError::SocketClosed),
            None => return Err(BridgeError::timeout("accept", timeout)),
        };
        debug!("Accepting {} on {}", incoming, self.service_name);

        let options = SocketOptions { miu, rw };
        let buffer = vec![0u8; working_buffer_len(usize::from(miu), usize::from(rw), linear_buffer_len)];
        let (waiter, signal) = rendezvous();
        let callback = completion("accept", signal.clone());
        let status = self.session.issue("accept", |driver| {
            driver.accept(incoming, options, buffer, socket_error_handler(), callback)
        });
        if let Err(err) =
            self.session
                .settle_socket(&self.core, "accept", status, (waiter, signal), None)
        {
            self.session.close_handle(incoming);
            return Err(err);
        }

        Ok(Socket {
            core: self.session.register_socket(incoming, SocketState::Connected),
            session: Arc::clone(&self.session),
            sap: self.sap,
            miu,
            rw,
            linear_buffer_len,
        })
    }

    /// Stop listening and close. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.session.close_socket(&self.core)
    }
}

impl fmt::Debug for ServiceSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSocket")
            .field("handle", &self.core.handle())
            .field("sap", &self.sap)
            .field("service_name", &self.service_name)
            .field("pending", &self.incoming.len())
            .finish()
    }
}

impl Drop for ServiceSocket {
    fn drop(&mut self) {
        if self.session.close_socket(&self.core).is_err() {
            debug!("Close on drop of socket {} failed", self.core.handle());
        }
    }
}

/// Connection-oriented socket.
pub struct Socket {
    session: Arc<Shared>,
    core: Arc<SocketCore>,
    sap: u8,
    miu: u16,
    rw: u8,
    linear_buffer_len: usize,
}

impl Socket {
    pub fn handle(&self) -> SocketHandle {
        self.core.handle()
    }

    pub fn sap(&self) -> u8 {
        self.sap
    }

    /// Local flow-control options.
    pub fn options(&self) -> SocketOptions {
        SocketOptions {
            miu: self.miu,
            rw: self.rw,
        }
    }

    /// Size of the working buffer handed to the driver.
    pub fn working_buffer_len(&self) -> usize {
        working_buffer_len(usize::from(self.miu), usize::from(self.rw), self.linear_buffer_len)
    }

    pub fn state(&self) -> SocketState {
        self.core.state()
    }

    /// Connect to `sap` on the peer. A zero timeout waits forever.
    pub fn connect(&mut self, sap: u8, timeout: Duration) -> Result<()> {
        let socket = self.core.handle();
        self.connect_with("connect", timeout, |driver, callback| {
            driver.connect(socket, sap, callback)
        })
    }

    /// Connect to a named service on the peer. A zero timeout waits forever.
    pub fn connect_by_name(&mut self, service_name: &str, timeout: Duration) -> Result<()> {
        let socket = self.core.handle();
        self.connect_with("connect_by_name", timeout, |driver, callback| {
            driver.connect_by_name(socket, service_name, callback)
        })
    }

    fn connect_with(
        &self,
        operation: &'static str,
        timeout: Duration,
        request: impl FnOnce(&dyn nfclink_driver::NfcDriver, ConnectCallback) -> NfcStatus,
    ) -> Result<()> {
        let resting = self.core.transition(operation, SocketState::Connecting)?;

        let (waiter, signal) = rendezvous();
        let callback = connect_callback(operation, signal.clone());
        let status = self
            .session
            .issue(operation, |driver| request(driver, callback));

        match self.session.settle_socket(
            &self.core,
            operation,
            status,
            (waiter, signal),
            bound(timeout),
        ) {
            Ok(()) => {
                self.core.restore(SocketState::Connected);
                info!("Socket {} connected", self.core.handle());
                Ok(())
            }
            Err(err) => {
                self.core.restore(resting);
                Err(err)
            }
        }
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.core.require("send", &[SocketState::Connected])?;

        let (waiter, signal) = rendezvous();
        let socket = self.core.handle();
        let callback = completion("send", signal.clone());
        let status = self
            .session
            .issue("send", |driver| driver.send(socket, data.to_vec(), callback));
        self.session
            .settle_socket(&self.core, "send", status, (waiter, signal), None)
    }

    /// Receive into `buf`, returning the number of bytes written.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.core.require("receive", &[SocketState::Connected])?;

        let (waiter, signal) = rendezvous::<(NfcStatus, Vec<u8>)>();
        let socket = self.core.handle();
        let delivery = signal.clone();
        let status = self.session.issue("receive", |driver| {
            driver.receive(
                socket,
                buf.len(),
                Box::new(move |status, data| {
                    log_completion("receive", status);
                    delivery.complete((status, data));
                }),
            )
        });
        if !status.is_pending() {
            self.session.latch(status);
            return Err(BridgeError::rejected("receive", status));
        }

        let (status, data) =
            self.session
                .wait_socket(&self.core, "receive", waiter, signal, None)?;
        if !status.is_success() {
            self.session.latch(status);
            return Err(BridgeError::failed("receive", status));
        }
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    /// Close the socket. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.session.close_socket(&self.core)
    }

    /// MIU announced by the remote end, 0 if unavailable.
    pub fn remote_miu(&self) -> u16 {
        self.remote_options().map_or(0, |options| options.miu)
    }

    /// Receive window announced by the remote end, 0 if unavailable.
    pub fn remote_rw(&self) -> u8 {
        self.remote_options().map_or(0, |options| options.rw)
    }

    fn remote_options(&self) -> Option<SocketOptions> {
        let socket = self.core.handle();
        self.session
            .query("remote_socket_options", |driver| {
                driver.remote_socket_options(socket)
            })
            .ok()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("handle", &self.core.handle())
            .field("sap", &self.sap)
            .field("state", &self.core.state())
            .field("options", &self.options())
            .finish()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.session.close_socket(&self.core).is_err() {
            debug!("Close on drop of socket {} failed", self.core.handle());
        }
    }
}

impl Session {
    /// Create a connectionless socket bound to `sap`.
    pub fn create_connectionless_socket(&self, sap: u8) -> Result<ConnectionlessSocket> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let socket = self
            .shared
            .create_socket(SocketKind::Connectionless, None, None)?;
        self.shared.bind_or_close(socket, sap)?;

        Ok(ConnectionlessSocket {
            core: self.shared.register_socket(socket, SocketState::Bound),
            session: Arc::clone(&self.shared),
            sap,
            link_miu: LLCP_MIU_DEFAULT,
        })
    }

    /// Create a listening socket for `service_name` bound to `sap`.
    pub fn create_service_socket(
        &self,
        sap: u8,
        service_name: &str,
        miu: u16,
        rw: u8,
        linear_buffer_len: usize,
    ) -> Result<ServiceSocket> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let options = SocketOptions { miu, rw };
        let buffer = vec![0u8; working_buffer_len(usize::from(miu), usize::from(rw), linear_buffer_len)];
        let socket = self.shared.create_socket(
            SocketKind::ConnectionOriented,
            Some(options),
            Some(buffer),
        )?;
        self.shared.bind_or_close(socket, sap)?;

        let incoming = Arc::new(Mailbox::new());
        let listener: ListenHandler = {
            let incoming = Arc::clone(&incoming);
            Arc::new(move |socket| {
                if incoming.post(socket) {
                    debug!("Incoming connection {}", socket);
                } else {
                    debug!("Incoming connection {} on a closed listener, dropped", socket);
                }
            })
        };
        let status = self
            .shared
            .issue("listen", |driver| driver.listen(socket, service_name, listener));
        if !status.is_success() {
            self.shared.latch(status);
            self.shared.close_handle(socket);
            return Err(BridgeError::rejected("listen", status));
        }
        info!("Listening on SAP {} as {}", sap, service_name);

        Ok(ServiceSocket {
            core: self.shared.register_listener(socket, Arc::clone(&incoming)),
            session: Arc::clone(&self.shared),
            sap,
            service_name: service_name.to_string(),
            incoming,
        })
    }

    /// Create a client socket. It is bound only when `sap` is not 0.
    pub fn create_socket(
        &self,
        sap: u8,
        miu: u16,
        rw: u8,
        linear_buffer_len: usize,
    ) -> Result<Socket> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let options = SocketOptions { miu, rw };
        let buffer = vec![0u8; working_buffer_len(usize::from(miu), usize::from(rw), linear_buffer_len)];
        let socket = self.shared.create_socket(
            SocketKind::ConnectionOriented,
            Some(options),
            Some(buffer),
        )?;
        let state = if sap != 0 {
            self.shared.bind_or_close(socket, sap)?;
            SocketState::Bound
        } else {
            SocketState::Unbound
        };

        Ok(Socket {
            core: self.shared.register_socket(socket, state),
            session: Arc::clone(&self.shared),
            sap,
            miu,
            rw,
            linear_buffer_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SocketState::Unbound, SocketState::Bound, true)]
    #[case(SocketState::Unbound, SocketState::Connecting, true)]
    #[case(SocketState::Unbound, SocketState::Listening, false)]
    #[case(SocketState::Bound, SocketState::Listening, true)]
    #[case(SocketState::Bound, SocketState::Connected, false)]
    #[case(SocketState::Connecting, SocketState::Connected, true)]
    #[case(SocketState::Connecting, SocketState::Bound, true)]
    #[case(SocketState::Connected, SocketState::Connecting, false)]
    #[case(SocketState::Connected, SocketState::Closed, true)]
    #[case(SocketState::Listening, SocketState::Closed, true)]
    #[case(SocketState::Closed, SocketState::Closed, false)]
    #[case(SocketState::Closed, SocketState::Bound, false)]
    fn test_socket_transitions(
        #[case] from: SocketState,
        #[case] to: SocketState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(&to), allowed);
    }

    #[test]
    fn test_core_rejects_ops_after_close() {
        let core = SocketCore::new(SocketHandle(1), SocketState::Connected);
        assert!(core.require("send", &[SocketState::Connected]).is_ok());

        assert!(core.mark_closed());
        assert!(!core.mark_closed());
        assert!(matches!(
            core.require("send", &[SocketState::Connected]),
            Err(BridgeError::SocketClosed)
        ));
        assert!(matches!(
            core.transition("connect", SocketState::Connecting),
            Err(BridgeError::SocketClosed)
        ));
    }

    #[test]
    fn test_core_transition_returns_previous_state() {
        let core = SocketCore::new(SocketHandle(1), SocketState::Bound);
        assert_eq!(
            core.transition("connect", SocketState::Connecting).unwrap(),
            SocketState::Bound
        );
        core.restore(SocketState::Bound);
        assert_eq!(core.state(), SocketState::Bound);

        let err = core
            .transition("listen", SocketState::Connected)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Socket operation listen not allowed in state Bound"
        );
    }

    #[test]
    fn test_close_fires_armed_interrupt() {
        let core = SocketCore::new(SocketHandle(1), SocketState::Connected);
        let (waiter, signal) = rendezvous::<NfcStatus>();
        core.arm(Box::new(move || {
            signal.cancel();
        }));

        assert!(core.mark_closed());
        assert_eq!(
            waiter.wait(Some(Duration::from_secs(1))),
            Err(crate::rendezvous::WaitError::Cancelled)
        );
    }

    #[test]
    fn test_arm_after_close_fires_at_once() {
        let core = SocketCore::new(SocketHandle(1), SocketState::Connected);
        core.mark_closed();

        let (waiter, signal) = rendezvous::<NfcStatus>();
        core.arm(Box::new(move || {
            signal.cancel();
        }));
        assert_eq!(
            waiter.wait(Some(Duration::from_secs(1))),
            Err(crate::rendezvous::WaitError::Cancelled)
        );
    }

    #[test]
    fn test_closing_listener_closes_mailbox() {
        let incoming = Arc::new(Mailbox::new());
        let core = SocketCore::listener(SocketHandle(2), Arc::clone(&incoming));
        assert!(incoming.post(SocketHandle(3)));

        core.mark_closed();
        assert!(incoming.is_closed());
        assert_eq!(incoming.take(None), None);
    }

    #[test]
    fn test_restore_keeps_closed() {
        let core = SocketCore::new(SocketHandle(1), SocketState::Connecting);
        core.mark_closed();
        core.restore(SocketState::Bound);
        assert_eq!(core.state(), SocketState::Closed);
    }
}
