//! Mock driver implementation for testing and development.
//!
//! [`MockDriver`] behaves like a well-mannered driver stack: it accepts
//! requests, posts their callbacks to the deferred-work queue and keeps a
//! record of everything it was asked to do. The paired [`MockDriverHandle`]
//! scripts how each operation answers and simulates events coming from the
//! RF field (tags, peers, link changes, incoming connections). Discovered
//! devices stay in the field until [`MockDriverHandle::remove_target`].
//!
//! # Examples
//!
//! ```
//! use nfclink_core::NfcStatus;
//! use nfclink_driver::mock::{Behavior, MockDriver, MockOp};
//! use nfclink_driver::queue::{DeferredQueue, QueueMessage};
//! use nfclink_driver::traits::NfcDriver;
//! use nfclink_driver::types::DriverConfig;
//!
//! let (driver, handle) = MockDriver::new();
//! let (queue, mut receiver) = DeferredQueue::channel();
//! driver.configure(&DriverConfig::default(), queue);
//!
//! handle.set_behavior(MockOp::Initialize, Behavior::Reject(NfcStatus::FAILED));
//! assert_eq!(driver.initialize(Box::new(|_| {})), NfcStatus::FAILED);
//!
//! handle.set_behavior(MockOp::Initialize, Behavior::Complete(NfcStatus::SUCCESS));
//! assert_eq!(driver.initialize(Box::new(|_| {})), NfcStatus::PENDING);
//! assert!(matches!(receiver.blocking_recv(), Some(QueueMessage::Call(_))));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nfclink_core::NfcStatus;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::queue::DeferredQueue;
use crate::traits::{
    ConnectCallback, DataCallback, LinkStatusHandler, ListenHandler, NdefCheckCallback,
    NfcDriver, NotificationHandler, ReceiveCallback, ReceiveFromCallback, SocketErrorHandler,
    StatusCallback, TransactionHandler,
};
use crate::types::{
    DisconnectReason, DiscoveryAction, DiscoveryConfig, DriverConfig, LinkParameters, LinkStatus,
    Registration, RemoteDevice, RemoteHandle, SecureElement, SecureElementHandle,
    SecureElementMode, SocketError, SocketHandle, SocketKind, SocketOptions, StackCapabilities,
    TransceiveCommand,
};

/// Driver operations the mock records and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Configure,
    Unconfigure,
    Initialize,
    Deinitialize,
    /// Deinitialize without a callback.
    Reset,
    Capabilities,
    SecureElements,
    SetSecureElementMode,
    SetLinkParameters,
    RegisterNotification,
    RegisterTransactionHandler,
    ConfigureDiscovery,
    Disconnect,
    ConnectTarget,
    CheckPresence,
    Transceive,
    CheckNdef,
    ReadNdef,
    WriteNdef,
    PeerSend,
    PeerReceive,
    CheckLink,
    ActivateLink,
    RemoteLinkParameters,
    Socket,
    Bind,
    Listen,
    Accept,
    Connect,
    ConnectByName,
    Send,
    Receive,
    SendTo,
    ReceiveFrom,
    Close,
    RemoteSocketOptions,
}

/// How the mock answers an operation.
///
/// Synchronous operations only distinguish [`Behavior::Reject`] (return that
/// status) from everything else (return success).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Accept with `PENDING` and post the callback right away.
    Complete(NfcStatus),
    /// Return `SUCCESS` and still post the callback.
    CompleteSynchronously(NfcStatus),
    /// Accept with `PENDING` and post the callback after a delay.
    Delayed(Duration, NfcStatus),
    /// Accept with `PENDING` and keep the callback until
    /// [`MockDriverHandle::release`].
    Hold,
    /// Refuse with the status; no callback.
    Reject(NfcStatus),
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior::Complete(NfcStatus::SUCCESS)
    }
}

type Completion = Box<dyn FnOnce(NfcStatus) + Send + 'static>;

struct HeldCompletion {
    op: MockOp,
    completion: Completion,
}

/// Socket as tracked by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSocket {
    pub kind: SocketKind,
    pub options: Option<SocketOptions>,
    /// Length of the working buffer handed over at creation or accept.
    pub working_buffer_len: usize,
    pub sap: Option<u8>,
    pub service_name: Option<String>,
}

/// Payload handed to a send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub socket: SocketHandle,
    /// Destination SAP for connectionless sends.
    pub sap: Option<u8>,
    pub data: Vec<u8>,
}

/// Frame handed to a remote target by a transceive or a peer send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFrame {
    pub target: RemoteHandle,
    /// Framing of a transceive; `None` for peer sends.
    pub command: Option<TransceiveCommand>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct MockNdef {
    max_len: usize,
    message: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    queue: Option<DeferredQueue>,
    driver_config: Option<DriverConfig>,
    initialized: bool,
    behaviors: HashMap<MockOp, Behavior>,
    once: HashMap<MockOp, Behavior>,
    calls: Vec<MockOp>,
    held: VecDeque<HeldCompletion>,
    in_flight: usize,
    max_in_flight: usize,
    capabilities: StackCapabilities,
    secure_elements: Vec<SecureElement>,
    secure_element_modes: Vec<(SecureElementHandle, SecureElementMode)>,
    link_parameters: Option<LinkParameters>,
    remote_link_parameters: LinkParameters,
    registration: Option<Registration>,
    notification: Option<NotificationHandler>,
    transaction: Option<TransactionHandler>,
    link_status: Option<LinkStatusHandler>,
    discovery: Vec<(DiscoveryAction, DiscoveryConfig)>,
    targets: HashMap<RemoteHandle, RemoteDevice>,
    ndef: HashMap<RemoteHandle, MockNdef>,
    remote_inbound: HashMap<RemoteHandle, VecDeque<Vec<u8>>>,
    target_frames: Vec<TargetFrame>,
    sockets: HashMap<SocketHandle, MockSocket>,
    socket_errors: HashMap<SocketHandle, SocketErrorHandler>,
    listeners: HashMap<SocketHandle, ListenHandler>,
    inbound: HashMap<SocketHandle, VecDeque<(u8, Vec<u8>)>>,
    sent: Vec<SentFrame>,
    remote_options: SocketOptions,
    connect_refusal: Option<DisconnectReason>,
    next_handle: u32,
}

impl MockState {
    fn behavior(&mut self, op: MockOp) -> Behavior {
        self.once
            .remove(&op)
            .or_else(|| self.behaviors.get(&op).copied())
            .unwrap_or_default()
    }

    /// Record a synchronous call and return its scripted refusal, if any.
    fn sync_call(&mut self, op: MockOp) -> Option<NfcStatus> {
        self.calls.push(op);
        match self.behavior(op) {
            Behavior::Reject(status) => Some(status),
            _ => None,
        }
    }

    fn pop_remote(&mut self, target: RemoteHandle, capacity: usize) -> Vec<u8> {
        let mut data = self
            .remote_inbound
            .get_mut(&target)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        data.truncate(capacity);
        data
    }

    fn allocate_handle(&mut self) -> SocketHandle {
        self.next_handle += 1;
        SocketHandle(self.next_handle)
    }
}

/// Mock contactless driver.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create a mock driver and the handle that controls it.
    pub fn new() -> (Self, MockDriverHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let driver = Self {
            state: Arc::clone(&state),
        };
        (driver, MockDriverHandle { state })
    }

    /// Accept or refuse an asynchronous request according to its behavior.
    fn request(&self, op: MockOp, completion: Completion) -> NfcStatus {
        let mut state = self.state.lock();
        state.calls.push(op);

        let behavior = state.behavior(op);
        if let Behavior::Reject(status) = behavior {
            return status;
        }
        let Some(queue) = state.queue.clone() else {
            return NfcStatus::NOT_INITIALISED;
        };

        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        let completion = self.tracked(completion);

        match behavior {
            Behavior::Complete(status) => {
                queue.defer(move || completion(status));
                NfcStatus::PENDING
            }
            Behavior::CompleteSynchronously(status) => {
                queue.defer(move || completion(status));
                NfcStatus::SUCCESS
            }
            Behavior::Delayed(delay, status) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    queue.defer(move || completion(status));
                });
                NfcStatus::PENDING
            }
            Behavior::Hold | Behavior::Reject(_) => {
                state.held.push_back(HeldCompletion { op, completion });
                NfcStatus::PENDING
            }
        }
    }

    /// Wrap a completion so the in-flight counter drops when it runs.
    fn tracked(&self, completion: Completion) -> Completion {
        let state = Arc::clone(&self.state);
        Box::new(move |status| {
            {
                let mut state = state.lock();
                state.in_flight = state.in_flight.saturating_sub(1);
            }
            completion(status);
        })
    }
}

impl NfcDriver for MockDriver {
    fn configure(&self, config: &DriverConfig, queue: DeferredQueue) -> NfcStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::Configure) {
            return status;
        }
        let already = state.driver_config.is_some();
        state.driver_config = Some(config.clone());
        state.queue = Some(queue);
        if already {
            NfcStatus::ALREADY_INITIALISED
        } else {
            NfcStatus::SUCCESS
        }
    }

    fn unconfigure(&self) -> NfcStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::Unconfigure) {
            return status;
        }
        state.driver_config = None;
        state.queue = None;
        NfcStatus::SUCCESS
    }

    fn initialize(&self, on_complete: StatusCallback) -> NfcStatus {
        let state = Arc::clone(&self.state);
        self.request(
            MockOp::Initialize,
            Box::new(move |status| {
                if status.is_success() {
                    state.lock().initialized = true;
                }
                on_complete(status);
            }),
        )
    }

    fn deinitialize(&self, on_complete: Option<StatusCallback>) -> NfcStatus {
        let Some(on_complete) = on_complete else {
            let mut state = self.state.lock();
            if let Some(status) = state.sync_call(MockOp::Reset) {
                return status;
            }
            state.initialized = false;
            return NfcStatus::SUCCESS;
        };

        let state = Arc::clone(&self.state);
        self.request(
            MockOp::Deinitialize,
            Box::new(move |status| {
                state.lock().initialized = false;
                on_complete(status);
            }),
        )
    }

    fn capabilities(&self) -> Result<StackCapabilities, NfcStatus> {
        let mut state = self.state.lock();
        match state.sync_call(MockOp::Capabilities) {
            Some(status) => Err(status),
            None => Ok(state.capabilities.clone()),
        }
    }

    fn secure_elements(&self) -> Result<Vec<SecureElement>, NfcStatus> {
        let mut state = self.state.lock();
        match state.sync_call(MockOp::SecureElements) {
            Some(status) => Err(status),
            None => Ok(state.secure_elements.clone()),
        }
    }

    fn set_secure_element_mode(
        &self,
        secure_element: SecureElementHandle,
        mode: SecureElementMode,
        on_complete: StatusCallback,
    ) -> NfcStatus {
        self.state
            .lock()
            .secure_element_modes
            .push((secure_element, mode));
        self.request(MockOp::SetSecureElementMode, on_complete)
    }

    fn set_link_parameters(
        &self,
        params: &LinkParameters,
        on_complete: StatusCallback,
    ) -> NfcStatus {
        self.state.lock().link_parameters = Some(*params);
        self.request(MockOp::SetLinkParameters, on_complete)
    }

    fn register_notification(
        &self,
        registration: &Registration,
        handler: NotificationHandler,
    ) -> NfcStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::RegisterNotification) {
            return status;
        }
        state.registration = Some(*registration);
        state.notification = Some(handler);
        NfcStatus::SUCCESS
    }

    fn register_transaction_handler(&self, handler: TransactionHandler) -> NfcStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::RegisterTransactionHandler) {
            return status;
        }
        state.transaction = Some(handler);
        NfcStatus::SUCCESS
    }

    fn configure_discovery(
        &self,
        action: DiscoveryAction,
        config: &DiscoveryConfig,
        on_complete: StatusCallback,
    ) -> NfcStatus {
        self.state.lock().discovery.push((action, *config));
        self.request(MockOp::ConfigureDiscovery, on_complete)
    }

    fn disconnect(&self, _target: RemoteHandle, on_complete: StatusCallback) -> NfcStatus {
        self.request(MockOp::Disconnect, on_complete)
    }

    fn connect_target(&self, target: RemoteHandle, on_complete: DataCallback) -> NfcStatus {
        let general_bytes = self
            .state
            .lock()
            .targets
            .get(&target)
            .map(|device| device.general_bytes.clone())
            .unwrap_or_default();
        self.request(
            MockOp::ConnectTarget,
            Box::new(move |status| {
                let general_bytes = if status.is_success() { general_bytes } else { Vec::new() };
                on_complete(status, general_bytes);
            }),
        )
    }

    fn check_presence(&self, target: RemoteHandle, on_complete: StatusCallback) -> NfcStatus {
        let present = self.state.lock().targets.contains_key(&target);
        self.request(
            MockOp::CheckPresence,
            Box::new(move |status| {
                if status.is_success() && !present {
                    on_complete(NfcStatus::TARGET_LOST);
                } else {
                    on_complete(status);
                }
            }),
        )
    }

    fn transceive(
        &self,
        target: RemoteHandle,
        command: TransceiveCommand,
        data: Vec<u8>,
        capacity: usize,
        on_complete: DataCallback,
    ) -> NfcStatus {
        let response = {
            let mut state = self.state.lock();
            state.target_frames.push(TargetFrame {
                target,
                command: Some(command),
                data,
            });
            state.pop_remote(target, capacity)
        };
        self.request(
            MockOp::Transceive,
            Box::new(move |status| {
                let payload = if status.is_success() { response } else { Vec::new() };
                on_complete(status, payload);
            }),
        )
    }

    fn check_ndef(&self, target: RemoteHandle, on_complete: NdefCheckCallback) -> NfcStatus {
        let max_len = self.state.lock().ndef.get(&target).map(|ndef| ndef.max_len);
        self.request(
            MockOp::CheckNdef,
            Box::new(move |status| match max_len {
                Some(max_len) if status.is_success() => on_complete(status, max_len),
                None if status.is_success() => on_complete(NfcStatus::FEATURE_NOT_SUPPORTED, 0),
                _ => on_complete(status, 0),
            }),
        )
    }

    fn read_ndef(
        &self,
        target: RemoteHandle,
        capacity: usize,
        on_complete: DataCallback,
    ) -> NfcStatus {
        let mut message = self
            .state
            .lock()
            .ndef
            .get(&target)
            .map(|ndef| ndef.message.clone())
            .unwrap_or_default();
        message.truncate(capacity);
        self.request(
            MockOp::ReadNdef,
            Box::new(move |status| {
                let payload = if status.is_success() { message } else { Vec::new() };
                on_complete(status, payload);
            }),
        )
    }

    fn write_ndef(
        &self,
        target: RemoteHandle,
        message: Vec<u8>,
        on_complete: StatusCallback,
    ) -> NfcStatus {
        let state = Arc::clone(&self.state);
        self.request(
            MockOp::WriteNdef,
            Box::new(move |status| {
                if status.is_success() {
                    state.lock().ndef.entry(target).or_default().message = message;
                }
                on_complete(status);
            }),
        )
    }

    fn peer_send(
        &self,
        target: RemoteHandle,
        data: Vec<u8>,
        on_complete: StatusCallback,
    ) -> NfcStatus {
        self.state.lock().target_frames.push(TargetFrame {
            target,
            command: None,
            data,
        });
        self.request(MockOp::PeerSend, on_complete)
    }

    fn peer_receive(&self, target: RemoteHandle, on_complete: DataCallback) -> NfcStatus {
        let data = self.state.lock().pop_remote(target, usize::MAX);
        self.request(
            MockOp::PeerReceive,
            Box::new(move |status| {
                let payload = if status.is_success() { data } else { Vec::new() };
                on_complete(status, payload);
            }),
        )
    }

    fn check_link(
        &self,
        _target: RemoteHandle,
        on_complete: StatusCallback,
        on_link_status: LinkStatusHandler,
    ) -> NfcStatus {
        let status = self.request(MockOp::CheckLink, on_complete);
        if status.is_pending() || status.is_success() {
            self.state.lock().link_status = Some(on_link_status);
        }
        status
    }

    fn activate_link(&self, _target: RemoteHandle) -> NfcStatus {
        self.state
            .lock()
            .sync_call(MockOp::ActivateLink)
            .unwrap_or(NfcStatus::SUCCESS)
    }

    fn remote_link_parameters(&self, _target: RemoteHandle) -> Result<LinkParameters, NfcStatus> {
        let mut state = self.state.lock();
        match state.sync_call(MockOp::RemoteLinkParameters) {
            Some(status) => Err(status),
            None => Ok(state.remote_link_parameters),
        }
    }

    fn socket(
        &self,
        kind: SocketKind,
        options: Option<SocketOptions>,
        working_buffer: Option<Vec<u8>>,
        on_error: SocketErrorHandler,
    ) -> Result<SocketHandle, NfcStatus> {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::Socket) {
            return Err(status);
        }
        let handle = state.allocate_handle();
        state.sockets.insert(
            handle,
            MockSocket {
                kind,
                options,
                working_buffer_len: working_buffer.map_or(0, |buffer| buffer.len()),
                sap: None,
                service_name: None,
            },
        );
        state.socket_errors.insert(handle, on_error);
        Ok(handle)
    }

    fn bind(&self, socket: SocketHandle, sap: u8) -> NfcStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::Bind) {
            return status;
        }
        match state.sockets.get_mut(&socket) {
            Some(entry) => {
                entry.sap = Some(sap);
                NfcStatus::SUCCESS
            }
            None => NfcStatus::INVALID_HANDLE,
        }
    }

    fn listen(
        &self,
        socket: SocketHandle,
        service_name: &str,
        on_incoming: ListenHandler,
    ) -> NfcStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::Listen) {
            return status;
        }
        let Some(entry) = state.sockets.get_mut(&socket) else {
            return NfcStatus::INVALID_HANDLE;
        };
        entry.service_name = Some(service_name.to_string());
        state.listeners.insert(socket, on_incoming);
        NfcStatus::SUCCESS
    }

    fn accept(
        &self,
        incoming: SocketHandle,
        options: SocketOptions,
        working_buffer: Vec<u8>,
        on_error: SocketErrorHandler,
        on_complete: StatusCallback,
    ) -> NfcStatus {
        {
            let mut state = self.state.lock();
            state.sockets.insert(
                incoming,
                MockSocket {
                    kind: SocketKind::ConnectionOriented,
                    options: Some(options),
                    working_buffer_len: working_buffer.len(),
                    sap: None,
                    service_name: None,
                },
            );
            state.socket_errors.insert(incoming, on_error);
        }
        self.request(MockOp::Accept, on_complete)
    }

    fn connect(&self, _socket: SocketHandle, _sap: u8, on_complete: ConnectCallback) -> NfcStatus {
        let refusal = self.state.lock().connect_refusal;
        self.request(
            MockOp::Connect,
            Box::new(move |status| {
                on_complete(status, refusal.filter(|_| !status.is_success()));
            }),
        )
    }

    fn connect_by_name(
        &self,
        _socket: SocketHandle,
        _service_name: &str,
        on_complete: ConnectCallback,
    ) -> NfcStatus {
        let refusal = self.state.lock().connect_refusal;
        self.request(
            MockOp::ConnectByName,
            Box::new(move |status| {
                on_complete(status, refusal.filter(|_| !status.is_success()));
            }),
        )
    }

    fn send(&self, socket: SocketHandle, data: Vec<u8>, on_complete: StatusCallback) -> NfcStatus {
        self.state.lock().sent.push(SentFrame {
            socket,
            sap: None,
            data,
        });
        self.request(MockOp::Send, on_complete)
    }

    fn receive(
        &self,
        socket: SocketHandle,
        capacity: usize,
        on_complete: ReceiveCallback,
    ) -> NfcStatus {
        let mut data = self.pop_inbound(socket).map(|(_, data)| data).unwrap_or_default();
        data.truncate(capacity);
        self.request(
            MockOp::Receive,
            Box::new(move |status| {
                let payload = if status.is_success() { data } else { Vec::new() };
                on_complete(status, payload);
            }),
        )
    }

    fn send_to(
        &self,
        socket: SocketHandle,
        sap: u8,
        data: Vec<u8>,
        on_complete: StatusCallback,
    ) -> NfcStatus {
        self.state.lock().sent.push(SentFrame {
            socket,
            sap: Some(sap),
            data,
        });
        self.request(MockOp::SendTo, on_complete)
    }

    fn receive_from(
        &self,
        socket: SocketHandle,
        capacity: usize,
        on_complete: ReceiveFromCallback,
    ) -> NfcStatus {
        let (sap, mut data) = self.pop_inbound(socket).unwrap_or_default();
        data.truncate(capacity);
        self.request(
            MockOp::ReceiveFrom,
            Box::new(move |status| {
                let payload = if status.is_success() { data } else { Vec::new() };
                on_complete(status, sap, payload);
            }),
        )
    }

    fn close(&self, socket: SocketHandle) -> NfcStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.sync_call(MockOp::Close) {
            return status;
        }
        state.socket_errors.remove(&socket);
        state.listeners.remove(&socket);
        state.inbound.remove(&socket);
        match state.sockets.remove(&socket) {
            Some(_) => NfcStatus::SUCCESS,
            None => NfcStatus::INVALID_HANDLE,
        }
    }

    fn remote_socket_options(&self, _socket: SocketHandle) -> Result<SocketOptions, NfcStatus> {
        let mut state = self.state.lock();
        match state.sync_call(MockOp::RemoteSocketOptions) {
            Some(status) => Err(status),
            None => Ok(state.remote_options),
        }
    }
}

impl MockDriver {
    fn pop_inbound(&self, socket: SocketHandle) -> Option<(u8, Vec<u8>)> {
        self.state
            .lock()
            .inbound
            .get_mut(&socket)
            .and_then(VecDeque::pop_front)
    }
}

/// Handle for scripting and inspecting a [`MockDriver`].
#[derive(Clone)]
pub struct MockDriverHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockDriverHandle {
    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Set how `op` answers from now on.
    pub fn set_behavior(&self, op: MockOp, behavior: Behavior) {
        self.state.lock().behaviors.insert(op, behavior);
    }

    /// Override how the next call of `op` answers; later calls fall back to
    /// the behavior set with [`set_behavior`](Self::set_behavior).
    pub fn set_behavior_once(&self, op: MockOp, behavior: Behavior) {
        self.state.lock().once.insert(op, behavior);
    }

    pub fn set_capabilities(&self, capabilities: StackCapabilities) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn set_secure_elements(&self, secure_elements: Vec<SecureElement>) {
        self.state.lock().secure_elements = secure_elements;
    }

    pub fn set_remote_link_parameters(&self, params: LinkParameters) {
        self.state.lock().remote_link_parameters = params;
    }

    pub fn set_remote_options(&self, options: SocketOptions) {
        self.state.lock().remote_options = options;
    }

    /// Disconnected-mode reason reported with failed connects.
    pub fn set_connect_refusal(&self, reason: Option<DisconnectReason>) {
        self.state.lock().connect_refusal = reason;
    }

    /// Give `target` an NDEF area of `max_len` bytes holding `message`.
    pub fn set_ndef(&self, target: RemoteHandle, max_len: usize, message: impl Into<Vec<u8>>) {
        self.state.lock().ndef.insert(
            target,
            MockNdef {
                max_len,
                message: message.into(),
            },
        );
    }

    /// Queue a response for the next transceive or peer receive on `target`.
    pub fn push_remote(&self, target: RemoteHandle, data: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .remote_inbound
            .entry(target)
            .or_default()
            .push_back(data.into());
    }

    /// Queue a frame for the next receive on `socket`.
    pub fn push_inbound(&self, socket: SocketHandle, sap: u8, data: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .inbound
            .entry(socket)
            .or_default()
            .push_back((sap, data.into()));
    }

    /// Post the oldest held callback of `op` with `status`.
    ///
    /// Returns `false` if nothing was held or the queue is gone.
    pub fn release(&self, op: MockOp, status: NfcStatus) -> bool {
        let mut state = self.state.lock();
        let Some(position) = state.held.iter().position(|held| held.op == op) else {
            return false;
        };
        let Some(held) = state.held.remove(position) else {
            return false;
        };
        let Some(queue) = state.queue.clone() else {
            return false;
        };
        queue.defer(move || (held.completion)(status))
    }

    // ------------------------------------------------------------------
    // Simulated field events
    // ------------------------------------------------------------------

    /// Report remote devices to the registered notification handler.
    ///
    /// The devices count as present in the field from now on.
    pub fn discover(&self, devices: Vec<RemoteDevice>) -> bool {
        self.discover_with(NfcStatus::SUCCESS, devices)
    }

    /// Report remote devices with a specific notification status.
    pub fn discover_with(&self, status: NfcStatus, devices: Vec<RemoteDevice>) -> bool {
        let handler = {
            let mut state = self.state.lock();
            for device in &devices {
                state.targets.insert(device.handle, device.clone());
            }
            state.notification.clone()
        };
        handler.is_some_and(|handler| self.post(move || handler(status, devices)))
    }

    /// Take a discovered device out of the field.
    pub fn remove_target(&self, target: RemoteHandle) -> bool {
        self.state.lock().targets.remove(&target).is_some()
    }

    /// Report that the current target was deselected.
    pub fn deselect(&self) -> bool {
        let handler = self.state.lock().notification.clone();
        handler.is_some_and(|handler| self.post(move || handler(NfcStatus::DESELECTED, Vec::new())))
    }

    pub fn link_status(&self, status: LinkStatus) -> bool {
        let handler = self.state.lock().link_status.clone();
        handler.is_some_and(|handler| self.post(move || handler(status)))
    }

    pub fn transaction(&self, aid: impl Into<Vec<u8>>) -> bool {
        let aid = aid.into();
        let handler = self.state.lock().transaction.clone();
        handler.is_some_and(|handler| self.post(move || handler(aid)))
    }

    pub fn socket_error(&self, socket: SocketHandle, error: SocketError) -> bool {
        let handler = self.state.lock().socket_errors.get(&socket).cloned();
        handler.is_some_and(|handler| self.post(move || handler(error)))
    }

    /// Simulate a remote connect on a listening socket.
    ///
    /// Returns the handle of the incoming socket.
    pub fn incoming_connection(&self, listening: SocketHandle) -> Option<SocketHandle> {
        let (handler, incoming) = {
            let mut state = self.state.lock();
            let handler = state.listeners.get(&listening).cloned()?;
            (handler, state.allocate_handle())
        };
        self.post(move || handler(incoming)).then_some(incoming)
    }

    /// Push an undecodable message through the queue.
    pub fn corrupt(&self, reason: &str) -> bool {
        let queue = self.state.lock().queue.clone();
        queue.is_some_and(|queue| queue.report_corrupt(reason))
    }

    /// Block until every item queued so far has been dispatched.
    pub fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if !self.post(move || {
            let _ = tx.send(());
        }) {
            return false;
        }
        rx.blocking_recv().is_ok()
    }

    fn post(&self, call: impl FnOnce() + Send + 'static) -> bool {
        let queue = self.state.lock().queue.clone();
        queue.is_some_and(|queue| queue.defer(call))
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn calls(&self) -> Vec<MockOp> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: MockOp) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().driver_config.is_some()
    }

    pub fn driver_config(&self) -> Option<DriverConfig> {
        self.state.lock().driver_config.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn registration(&self) -> Option<Registration> {
        self.state.lock().registration
    }

    pub fn link_parameters(&self) -> Option<LinkParameters> {
        self.state.lock().link_parameters
    }

    pub fn discovery_requests(&self) -> Vec<(DiscoveryAction, DiscoveryConfig)> {
        self.state.lock().discovery.clone()
    }

    pub fn last_discovery(&self) -> Option<(DiscoveryAction, DiscoveryConfig)> {
        self.state.lock().discovery.last().copied()
    }

    pub fn secure_element_modes(&self) -> Vec<(SecureElementHandle, SecureElementMode)> {
        self.state.lock().secure_element_modes.clone()
    }

    pub fn socket(&self, socket: SocketHandle) -> Option<MockSocket> {
        self.state.lock().sockets.get(&socket).cloned()
    }

    pub fn open_sockets(&self) -> usize {
        self.state.lock().sockets.len()
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.state.lock().sent.clone()
    }

    pub fn target_frames(&self) -> Vec<TargetFrame> {
        self.state.lock().target_frames.clone()
    }

    /// Current NDEF message of `target`, if it has an NDEF area.
    pub fn ndef_message(&self, target: RemoteHandle) -> Option<Vec<u8>> {
        self.state
            .lock()
            .ndef
            .get(&target)
            .map(|ndef| ndef.message.clone())
    }

    /// Number of callbacks currently held.
    pub fn held(&self, op: MockOp) -> usize {
        self.state
            .lock()
            .held
            .iter()
            .filter(|held| held.op == op)
            .count()
    }

    /// Highest number of accepted requests whose callback had not yet run.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn has_transaction_handler(&self) -> bool {
        self.state.lock().transaction.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DeferredReceiver, QueueMessage};
    use crate::types::RemoteDeviceType;
    use std::sync::atomic::{AtomicU16, Ordering};

    fn configured() -> (MockDriver, MockDriverHandle, DeferredReceiver) {
        let (driver, handle) = MockDriver::new();
        let (queue, receiver) = DeferredQueue::channel();
        assert_eq!(
            driver.configure(&DriverConfig::default(), queue),
            NfcStatus::SUCCESS
        );
        (driver, handle, receiver)
    }

    fn run_next(receiver: &mut DeferredReceiver) {
        match receiver.blocking_recv() {
            Some(QueueMessage::Call(call)) => call(),
            other => panic!("expected a deferred call, got {other:?}"),
        }
    }

    fn recording() -> (Arc<AtomicU16>, StatusCallback) {
        let seen = Arc::new(AtomicU16::new(u16::MAX));
        let s = Arc::clone(&seen);
        (seen, Box::new(move |status| s.store(status.code(), Ordering::SeqCst)))
    }

    #[test]
    fn test_configure_twice_reports_already_initialised() {
        let (driver, handle, _receiver) = configured();
        let (queue, _other) = DeferredQueue::channel();

        assert_eq!(
            driver.configure(&DriverConfig::default(), queue),
            NfcStatus::ALREADY_INITIALISED
        );
        assert!(handle.is_configured());
        assert_eq!(driver.unconfigure(), NfcStatus::SUCCESS);
        assert!(!handle.is_configured());
    }

    #[test]
    fn test_complete_posts_callback() {
        let (driver, handle, mut receiver) = configured();
        let (seen, callback) = recording();

        assert_eq!(driver.initialize(callback), NfcStatus::PENDING);
        run_next(&mut receiver);

        assert_eq!(seen.load(Ordering::SeqCst), NfcStatus::SUCCESS.code());
        assert!(handle.is_initialized());
    }

    #[test]
    fn test_reject_posts_nothing() {
        let (driver, handle, mut receiver) = configured();
        handle.set_behavior(MockOp::Initialize, Behavior::Reject(NfcStatus::FAILED));
        let (seen, callback) = recording();

        assert_eq!(driver.initialize(callback), NfcStatus::FAILED);
        assert_eq!(handle.max_in_flight(), 0);
        assert_eq!(handle.held(MockOp::Initialize), 0);

        drop(driver);
        drop(handle);
        assert!(receiver.blocking_recv().is_none());
        assert_eq!(seen.load(Ordering::SeqCst), u16::MAX);
    }

    #[test]
    fn test_behavior_once_applies_to_next_call() {
        let (driver, handle, _receiver) = configured();
        handle.set_behavior_once(MockOp::Bind, Behavior::Reject(NfcStatus::INVALID_STATE));
        let socket = driver
            .socket(SocketKind::Connectionless, None, None, Arc::new(|_| {}))
            .unwrap();

        assert_eq!(driver.bind(socket, 0x10), NfcStatus::INVALID_STATE);
        assert_eq!(driver.bind(socket, 0x10), NfcStatus::SUCCESS);
    }

    #[test]
    fn test_hold_and_release() {
        let (driver, handle, mut receiver) = configured();
        handle.set_behavior(MockOp::SetLinkParameters, Behavior::Hold);
        let (seen, callback) = recording();

        let status = driver.set_link_parameters(&LinkParameters::default(), callback);
        assert_eq!(status, NfcStatus::PENDING);
        assert_eq!(handle.held(MockOp::SetLinkParameters), 1);

        assert!(handle.release(MockOp::SetLinkParameters, NfcStatus::REJECTED));
        run_next(&mut receiver);
        assert_eq!(seen.load(Ordering::SeqCst), NfcStatus::REJECTED.code());
        assert_eq!(handle.held(MockOp::SetLinkParameters), 0);
        assert!(!handle.release(MockOp::SetLinkParameters, NfcStatus::SUCCESS));
    }

    #[test]
    fn test_delayed_completion() {
        let (driver, handle, mut receiver) = configured();
        handle.set_behavior(
            MockOp::Initialize,
            Behavior::Delayed(Duration::from_millis(20), NfcStatus::SUCCESS),
        );
        let (seen, callback) = recording();

        assert_eq!(driver.initialize(callback), NfcStatus::PENDING);
        run_next(&mut receiver);
        assert_eq!(seen.load(Ordering::SeqCst), NfcStatus::SUCCESS.code());
    }

    #[test]
    fn test_socket_tracking() {
        let (driver, handle, _receiver) = configured();
        let on_error: SocketErrorHandler = Arc::new(|_| {});

        let socket = driver
            .socket(
                SocketKind::ConnectionOriented,
                Some(SocketOptions { miu: 128, rw: 2 }),
                Some(vec![0; 1384]),
                on_error,
            )
            .unwrap();
        assert_eq!(handle.socket(socket).unwrap().working_buffer_len, 1384);
        assert_eq!(driver.bind(socket, 0x20), NfcStatus::SUCCESS);
        assert_eq!(handle.socket(socket).unwrap().sap, Some(0x20));

        assert_eq!(driver.close(socket), NfcStatus::SUCCESS);
        assert_eq!(handle.open_sockets(), 0);
        assert_eq!(driver.close(socket), NfcStatus::INVALID_HANDLE);
    }

    #[test]
    fn test_receive_delivers_inbound_frame() {
        let (driver, handle, mut receiver) = configured();
        let socket = driver
            .socket(SocketKind::Connectionless, None, None, Arc::new(|_| {}))
            .unwrap();
        handle.push_inbound(socket, 0x11, vec![1, 2, 3, 4]);

        let got = Arc::new(Mutex::new(None));
        let g = Arc::clone(&got);
        let status = driver.receive_from(
            socket,
            3,
            Box::new(move |status, sap, data| *g.lock() = Some((status, sap, data))),
        );
        assert_eq!(status, NfcStatus::PENDING);
        run_next(&mut receiver);

        assert_eq!(
            got.lock().clone(),
            Some((NfcStatus::SUCCESS, 0x11, vec![1, 2, 3]))
        );
    }

    #[test]
    fn test_presence_tracks_discovered_targets() {
        let (driver, handle, mut receiver) = configured();
        let device = RemoteDevice::new(RemoteHandle(4), RemoteDeviceType::Mifare);
        assert!(!handle.discover(vec![device]));

        let (seen, callback) = recording();
        assert_eq!(driver.check_presence(RemoteHandle(4), callback), NfcStatus::PENDING);
        run_next(&mut receiver);
        assert_eq!(seen.load(Ordering::SeqCst), NfcStatus::SUCCESS.code());

        assert!(handle.remove_target(RemoteHandle(4)));
        let (seen, callback) = recording();
        driver.check_presence(RemoteHandle(4), callback);
        run_next(&mut receiver);
        assert_eq!(seen.load(Ordering::SeqCst), NfcStatus::TARGET_LOST.code());
    }

    #[test]
    fn test_check_ndef_without_area() {
        let (driver, handle, mut receiver) = configured();
        let got = Arc::new(Mutex::new(None));

        let g = Arc::clone(&got);
        driver.check_ndef(
            RemoteHandle(4),
            Box::new(move |status, len| *g.lock() = Some((status, len))),
        );
        run_next(&mut receiver);
        assert_eq!(*got.lock(), Some((NfcStatus::FEATURE_NOT_SUPPORTED, 0)));

        handle.set_ndef(RemoteHandle(4), 46, vec![0xd1]);
        let g = Arc::clone(&got);
        driver.check_ndef(
            RemoteHandle(4),
            Box::new(move |status, len| *g.lock() = Some((status, len))),
        );
        run_next(&mut receiver);
        assert_eq!(*got.lock(), Some((NfcStatus::SUCCESS, 46)));
    }
}
