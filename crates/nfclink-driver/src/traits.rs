//! The asynchronous driver seam.
//!
//! [`NfcDriver`] is the boundary to the contactless driver stack. Every entry
//! point returns an [`NfcStatus`] immediately:
//!
//! - [`NfcStatus::PENDING`] means the request was accepted and its callback
//!   will be posted to the [`DeferredQueue`] handed over in
//!   [`NfcDriver::configure`];
//! - any other status means the request finished (or was refused)
//!   synchronously and, unless documented otherwise, no callback follows.
//!
//! Implementations never run a callback inline on the calling thread.
//!
//! [`NfcStatus::PENDING`]: nfclink_core::NfcStatus::PENDING

use std::sync::Arc;

use nfclink_core::NfcStatus;

use crate::queue::DeferredQueue;
use crate::types::{
    DisconnectReason, DiscoveryAction, DiscoveryConfig, DriverConfig, LinkParameters, LinkStatus,
    Registration, RemoteDevice, RemoteHandle, SecureElement, SecureElementHandle,
    SecureElementMode, SocketError, SocketHandle, SocketKind, SocketOptions, StackCapabilities,
    TransceiveCommand,
};

/// One-shot completion carrying only a status.
pub type StatusCallback = Box<dyn FnOnce(NfcStatus) + Send + 'static>;

/// One-shot completion of a connect request.
///
/// A refused connection carries the disconnected-mode reason when the peer
/// supplied one.
pub type ConnectCallback = Box<dyn FnOnce(NfcStatus, Option<DisconnectReason>) + Send + 'static>;

/// One-shot completion of a connection-oriented receive.
pub type ReceiveCallback = Box<dyn FnOnce(NfcStatus, Vec<u8>) + Send + 'static>;

/// One-shot completion of a connectionless receive: status, source SAP, payload.
pub type ReceiveFromCallback = Box<dyn FnOnce(NfcStatus, u8, Vec<u8>) + Send + 'static>;

/// One-shot completion carrying bytes from a remote target.
///
/// The bytes are empty unless the status is success.
pub type DataCallback = Box<dyn FnOnce(NfcStatus, Vec<u8>) + Send + 'static>;

/// One-shot completion of an NDEF check, with the largest message the tag
/// can hold.
pub type NdefCheckCallback = Box<dyn FnOnce(NfcStatus, usize) + Send + 'static>;

/// Standing handler for discovery notifications.
pub type NotificationHandler = Arc<dyn Fn(NfcStatus, Vec<RemoteDevice>) + Send + Sync + 'static>;

/// Standing handler for secure element transactions, called with the AID.
pub type TransactionHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync + 'static>;

/// Standing handler for peer link status changes.
pub type LinkStatusHandler = Arc<dyn Fn(LinkStatus) + Send + Sync + 'static>;

/// Standing handler for socket-level errors.
pub type SocketErrorHandler = Arc<dyn Fn(SocketError) + Send + Sync + 'static>;

/// Standing handler of a listening socket, called with each incoming socket.
pub type ListenHandler = Arc<dyn Fn(SocketHandle) + Send + Sync + 'static>;

/// Contactless driver stack.
///
/// All methods take `&self`; callers serialize access through their own
/// reentrancy guard, implementations only need to be `Send + Sync`.
pub trait NfcDriver: Send + Sync {
    // ------------------------------------------------------------------
    // Stack lifecycle
    // ------------------------------------------------------------------

    /// Configure the hardware link and hand over the deferred-work queue.
    ///
    /// Returns [`NfcStatus::ALREADY_INITIALISED`] when the driver was left
    /// configured by a previous session.
    fn configure(&self, config: &DriverConfig, queue: DeferredQueue) -> NfcStatus;

    /// Release the hardware link. Synchronous.
    fn unconfigure(&self) -> NfcStatus;

    fn initialize(&self, on_complete: StatusCallback) -> NfcStatus;

    /// Shut the stack down.
    ///
    /// With `None` the driver performs an unconditional reset and returns
    /// synchronously.
    fn deinitialize(&self, on_complete: Option<StatusCallback>) -> NfcStatus;

    /// Query stack and controller versions. Synchronous.
    fn capabilities(&self) -> Result<StackCapabilities, NfcStatus>;

    // ------------------------------------------------------------------
    // Secure elements
    // ------------------------------------------------------------------

    /// List attached secure elements. Synchronous.
    fn secure_elements(&self) -> Result<Vec<SecureElement>, NfcStatus>;

    fn set_secure_element_mode(
        &self,
        secure_element: SecureElementHandle,
        mode: SecureElementMode,
        on_complete: StatusCallback,
    ) -> NfcStatus;

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Push the local peer-to-peer link parameters.
    fn set_link_parameters(&self, params: &LinkParameters, on_complete: StatusCallback)
    -> NfcStatus;

    /// Register the handler for remote device notifications, replacing any
    /// previous registration.
    fn register_notification(
        &self,
        registration: &Registration,
        handler: NotificationHandler,
    ) -> NfcStatus;

    /// Register the secure element transaction handler.
    fn register_transaction_handler(&self, handler: TransactionHandler) -> NfcStatus;

    fn configure_discovery(
        &self,
        action: DiscoveryAction,
        config: &DiscoveryConfig,
        on_complete: StatusCallback,
    ) -> NfcStatus;

    /// Disconnect a remote device and continue polling.
    fn disconnect(&self, target: RemoteHandle, on_complete: StatusCallback) -> NfcStatus;

    // ------------------------------------------------------------------
    // Remote targets
    // ------------------------------------------------------------------

    /// Connect to a discovered tag or peer.
    ///
    /// For a peer, `on_complete` carries the ATR general bytes it answered
    /// with.
    fn connect_target(&self, target: RemoteHandle, on_complete: DataCallback) -> NfcStatus;

    /// Check whether the target is still in the field.
    ///
    /// `on_complete` reports success while it is.
    fn check_presence(&self, target: RemoteHandle, on_complete: StatusCallback) -> NfcStatus;

    /// Exchange one frame with a connected target.
    fn transceive(
        &self,
        target: RemoteHandle,
        command: TransceiveCommand,
        data: Vec<u8>,
        capacity: usize,
        on_complete: DataCallback,
    ) -> NfcStatus;

    fn check_ndef(&self, target: RemoteHandle, on_complete: NdefCheckCallback) -> NfcStatus;

    /// Read the NDEF message from its beginning, at most `capacity` bytes.
    fn read_ndef(&self, target: RemoteHandle, capacity: usize, on_complete: DataCallback)
    -> NfcStatus;

    fn write_ndef(&self, target: RemoteHandle, message: Vec<u8>, on_complete: StatusCallback)
    -> NfcStatus;

    /// Send to the remote initiator while acting as target.
    fn peer_send(&self, target: RemoteHandle, data: Vec<u8>, on_complete: StatusCallback)
    -> NfcStatus;

    /// Receive the next frame from the remote initiator.
    fn peer_receive(&self, target: RemoteHandle, on_complete: DataCallback) -> NfcStatus;

    // ------------------------------------------------------------------
    // Peer link
    // ------------------------------------------------------------------

    /// Check link-layer compliance of a discovered peer.
    ///
    /// Both [`NfcStatus::PENDING`] and [`NfcStatus::SUCCESS`] accept the
    /// request; in both cases `on_complete` is posted later. `on_link_status`
    /// stays registered for the lifetime of the link.
    fn check_link(
        &self,
        target: RemoteHandle,
        on_complete: StatusCallback,
        on_link_status: LinkStatusHandler,
    ) -> NfcStatus;

    /// Activate the peer link. Synchronous.
    fn activate_link(&self, target: RemoteHandle) -> NfcStatus;

    /// Parameters negotiated with the remote peer. Synchronous.
    fn remote_link_parameters(&self, target: RemoteHandle) -> Result<LinkParameters, NfcStatus>;

    // ------------------------------------------------------------------
    // Sockets
    // ------------------------------------------------------------------

    /// Create a socket.
    ///
    /// Connection-oriented sockets carry their flow-control options and take
    /// ownership of the working buffer used for the retransmission window.
    fn socket(
        &self,
        kind: SocketKind,
        options: Option<SocketOptions>,
        working_buffer: Option<Vec<u8>>,
        on_error: SocketErrorHandler,
    ) -> Result<SocketHandle, NfcStatus>;

    fn bind(&self, socket: SocketHandle, sap: u8) -> NfcStatus;

    fn listen(
        &self,
        socket: SocketHandle,
        service_name: &str,
        on_incoming: ListenHandler,
    ) -> NfcStatus;

    fn accept(
        &self,
        incoming: SocketHandle,
        options: SocketOptions,
        working_buffer: Vec<u8>,
        on_error: SocketErrorHandler,
        on_complete: StatusCallback,
    ) -> NfcStatus;

    fn connect(&self, socket: SocketHandle, sap: u8, on_complete: ConnectCallback) -> NfcStatus;

    fn connect_by_name(
        &self,
        socket: SocketHandle,
        service_name: &str,
        on_complete: ConnectCallback,
    ) -> NfcStatus;

    fn send(&self, socket: SocketHandle, data: Vec<u8>, on_complete: StatusCallback) -> NfcStatus;

    fn receive(
        &self,
        socket: SocketHandle,
        capacity: usize,
        on_complete: ReceiveCallback,
    ) -> NfcStatus;

    fn send_to(
        &self,
        socket: SocketHandle,
        sap: u8,
        data: Vec<u8>,
        on_complete: StatusCallback,
    ) -> NfcStatus;

    fn receive_from(
        &self,
        socket: SocketHandle,
        capacity: usize,
        on_complete: ReceiveFromCallback,
    ) -> NfcStatus;

    /// Close a socket. Synchronous.
    fn close(&self, socket: SocketHandle) -> NfcStatus;

    /// Flow-control options announced by the remote end. Synchronous.
    fn remote_socket_options(&self, socket: SocketHandle) -> Result<SocketOptions, NfcStatus>;
}
