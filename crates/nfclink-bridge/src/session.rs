//! Session lifecycle.
//!
//! A [`Session`] owns everything one contactless stack needs: the driver,
//! both guards, the dispatch thread, the discovery configuration and the
//! handles cached from discovery. Discovery, peer link and socket
//! operations are implemented on it in their own modules.
//!
//! # Bring-up
//!
//! 1. configure the hardware link and hand the driver a deferred-work queue;
//! 2. start the dispatch thread draining that queue;
//! 3. initialize the stack and wait for it;
//! 4. query capabilities (best effort);
//! 5. switch every secure element off, one at a time.
//!
//! Teardown is the reverse and never fails: if the graceful shutdown is
//! refused, fails or outlives its bound, the driver is reset instead.

use std::fmt;
use std::sync::{Arc, Weak};

use nfclink_core::constants::DISCOVERY_MODE_COUNT;
use nfclink_core::{NfcStatus, normalize_error};
use nfclink_driver::queue::DeferredQueue;
use nfclink_driver::traits::NfcDriver;
use nfclink_driver::types::{
    DiscoveryConfig, LinkParameters, Registration, RemoteDevice, RemoteHandle,
    SecureElementHandle, SecureElementMode, StackCapabilities,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::event::{self, EventSender, SessionEvents};
use crate::guard::{Guards, log_issue};
use crate::lifecycle::{LifecycleState, StateMachine};
use crate::peer::LinkState;
use crate::rendezvous::{Signal, WaitError, Waiter, completion, rendezvous};
use crate::socket::SocketCore;
use crate::target::DiscoveredTarget;

/// Outcome delivered to a pending open: the device, or the failing status.
pub(crate) type OpenOutcome = std::result::Result<RemoteDevice, NfcStatus>;

/// How a teardown ended. Both outcomes leave the session uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The driver acknowledged the shutdown in time.
    Graceful,
    /// The shutdown was refused, failed or timed out and the driver was reset.
    ForcedReset,
}

impl fmt::Display for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Teardown::Graceful => write!(f, "graceful"),
            Teardown::ForcedReset => write!(f, "forced reset"),
        }
    }
}

/// Mutable session state, only touched briefly and never across a driver call.
pub(crate) struct SessionState {
    pub(crate) lifecycle: StateMachine,
    pub(crate) discovery: DiscoveryConfig,
    pub(crate) registration: Registration,
    pub(crate) link_parameters: LinkParameters,
    pub(crate) mode_enabled: [bool; DISCOVERY_MODE_COUNT],
    pub(crate) last_error: NfcStatus,
    pub(crate) dispatcher: Option<Dispatcher>,
    pub(crate) llcp_handle: Option<RemoteHandle>,
    pub(crate) link_state: LinkState,
    pub(crate) secure_element: Option<SecureElementHandle>,
    pub(crate) last_target: Option<DiscoveredTarget>,
    /// Tag whose NDEF area was last checked, with its maximum message length.
    pub(crate) ndef: Option<(RemoteHandle, usize)>,
    pub(crate) capabilities: Option<StackCapabilities>,
    pub(crate) recoveries: u32,
}

impl SessionState {
    fn new(config: &SessionConfig) -> Self {
        Self {
            lifecycle: StateMachine::new(),
            discovery: config.discovery_config(),
            registration: Registration::default(),
            link_parameters: config.link_parameters,
            mode_enabled: [false; DISCOVERY_MODE_COUNT],
            last_error: NfcStatus::FAILED,
            dispatcher: None,
            llcp_handle: None,
            link_state: LinkState::Inactive,
            secure_element: None,
            last_target: None,
            ndef: None,
            capabilities: None,
            recoveries: 0,
        }
    }
}

/// State shared between the session, its sockets and the standing driver
/// handlers. Handlers hold it weakly.
pub(crate) struct Shared {
    pub(crate) driver: Arc<dyn NfcDriver>,
    pub(crate) guards: Arc<Guards>,
    pub(crate) config: SessionConfig,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) events: EventSender,
    /// Signal of the open currently waiting, for `cancel()`.
    pub(crate) open: Mutex<Option<Signal<OpenOutcome>>>,
    pub(crate) sockets: Mutex<Vec<Weak<SocketCore>>>,
}

impl Shared {
    // ------------------------------------------------------------------
    // Driver access
    // ------------------------------------------------------------------

    /// Issue a driver request under the reentrancy guard and log its result.
    pub(crate) fn issue(
        &self,
        operation: &'static str,
        request: impl FnOnce(&dyn NfcDriver) -> NfcStatus,
    ) -> NfcStatus {
        let status = {
            let _driver = self.guards.enter_driver();
            request(self.driver.as_ref())
        };
        log_issue(operation, status);
        status
    }

    /// Run a synchronous driver query under the reentrancy guard.
    pub(crate) fn query<T>(
        &self,
        operation: &'static str,
        request: impl FnOnce(&dyn NfcDriver) -> std::result::Result<T, NfcStatus>,
    ) -> std::result::Result<T, NfcStatus> {
        let result = {
            let _driver = self.guards.enter_driver();
            request(self.driver.as_ref())
        };
        if let Err(status) = &result {
            log_issue(operation, *status);
        }
        result
    }

    /// Record a failing status for `last_error()`.
    pub(crate) fn latch(&self, status: NfcStatus) {
        self.state.lock().last_error = status;
    }

    /// Wait for an accepted request and turn its status into a result.
    ///
    /// A non-pending `issued` status means the driver refused the request;
    /// no wait happens and the waiter is dropped unsignalled.
    pub(crate) fn settle(
        &self,
        operation: &'static str,
        issued: NfcStatus,
        waiter: Waiter<NfcStatus>,
        timeout: Option<std::time::Duration>,
    ) -> Result<()> {
        if !issued.is_pending() {
            self.latch(issued);
            return Err(BridgeError::rejected(operation, issued));
        }
        let status = self.wait(operation, waiter, timeout)?;
        if !status.is_success() {
            self.latch(status);
            return Err(BridgeError::failed(operation, status));
        }
        Ok(())
    }

    /// Like [`Shared::settle`] for requests whose callback carries a payload.
    pub(crate) fn settle_payload<T>(
        &self,
        operation: &'static str,
        issued: NfcStatus,
        waiter: Waiter<(NfcStatus, T)>,
    ) -> Result<T> {
        if !issued.is_pending() {
            self.latch(issued);
            return Err(BridgeError::rejected(operation, issued));
        }
        let (status, payload) = self.wait(operation, waiter, None)?;
        if !status.is_success() {
            self.latch(status);
            return Err(BridgeError::failed(operation, status));
        }
        Ok(payload)
    }

    pub(crate) fn wait<T>(
        &self,
        operation: &'static str,
        waiter: Waiter<T>,
        timeout: Option<std::time::Duration>,
    ) -> Result<T> {
        waiter.wait(timeout).map_err(|err| match err {
            WaitError::TimedOut => {
                warn!("{}() timed out", operation);
                BridgeError::timeout(operation, timeout.unwrap_or_default())
            }
            WaitError::Cancelled => {
                info!("{}() cancelled", operation);
                BridgeError::Cancelled { operation }
            }
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn lifecycle(&self) -> LifecycleState {
        self.state.lock().lifecycle.current_state()
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.lifecycle() {
            LifecycleState::Ready => Ok(()),
            state => Err(BridgeError::NotReady { state }),
        }
    }

    pub(crate) fn transition(&self, to: LifecycleState) -> Result<()> {
        let transition = self.state.lock().lifecycle.transition_to(to)?;
        info!("Session {} -> {}", transition.from, transition.to);
        Ok(())
    }

    /// Bring the stack up. On failure nothing stays configured or running.
    pub(crate) fn start_stack(&self) -> Result<()> {
        let (queue, receiver) = DeferredQueue::channel();
        let driver_config = self.config.driver_config();
        let status = self.issue("configure", |driver| {
            driver.configure(&driver_config, queue.clone())
        });
        if status == NfcStatus::ALREADY_INITIALISED {
            warn!("Driver already configured, reusing it");
        } else if !status.is_success() {
            self.latch(status);
            return Err(BridgeError::rejected("configure", status));
        }

        let dispatcher = match Dispatcher::spawn(queue, receiver, Arc::clone(&self.guards)) {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                error!("{}", err);
                self.unconfigure();
                return Err(err);
            }
        };

        if let Err(err) = self.bring_up() {
            dispatcher.stop();
            self.unconfigure();
            return Err(err);
        }

        self.state.lock().dispatcher = Some(dispatcher);
        Ok(())
    }

    fn bring_up(&self) -> Result<()> {
        let (waiter, signal) = rendezvous();
        let status = self.issue("initialize", |driver| {
            driver.initialize(completion("initialize", signal))
        });
        self.settle("initialize", status, waiter, None)?;

        if let Err(err) = self.prepare_stack() {
            let status = self.issue("deinitialize", |driver| driver.deinitialize(None));
            if !status.is_success() {
                error!("Reset after failed bring-up returned {}", status);
            }
            return Err(err);
        }
        Ok(())
    }

    fn prepare_stack(&self) -> Result<()> {
        match self.query("capabilities", |driver| driver.capabilities()) {
            Ok(capabilities) => {
                info!("Stack capabilities: {}", capabilities);
                self.state.lock().capabilities = Some(capabilities);
            }
            Err(_) => warn!("Stack capabilities unavailable"),
        }

        let secure_elements = self
            .query("secure_elements", |driver| driver.secure_elements())
            .unwrap_or_default();
        for secure_element in secure_elements {
            debug!(
                "Switching off secure element {} ({:?})",
                secure_element.handle, secure_element.kind
            );
            self.set_secure_element_mode(secure_element.handle, SecureElementMode::Off)?;
        }
        Ok(())
    }

    pub(crate) fn set_secure_element_mode(
        &self,
        secure_element: SecureElementHandle,
        mode: SecureElementMode,
    ) -> Result<()> {
        let (waiter, signal) = rendezvous();
        let status = self.issue("set_secure_element_mode", |driver| {
            driver.set_secure_element_mode(
                secure_element,
                mode,
                completion("set_secure_element_mode", signal),
            )
        });
        self.settle("set_secure_element_mode", status, waiter, None)
    }

    /// Tear the stack down. Always leaves the driver unconfigured.
    pub(crate) fn stop_stack(&self) -> Teardown {
        {
            let mut state = self.state.lock();
            state.discovery = self.config.discovery_config();
            state.registration = Registration::default();
            state.llcp_handle = None;
            state.link_state = LinkState::Inactive;
            state.last_target = None;
            state.ndef = None;
            state.secure_element = None;
        }
        self.close_tracked_sockets();

        let timeout = self.config.deinit_timeout();
        let (waiter, signal) = rendezvous();
        let status = self.issue("deinitialize", |driver| {
            driver.deinitialize(Some(completion("deinitialize", signal)))
        });

        let graceful = if status.is_pending() {
            match waiter.wait(Some(timeout)) {
                Ok(status) if status.is_success() => true,
                Ok(status) => {
                    warn!("Graceful shutdown failed with {}", status);
                    self.latch(status);
                    false
                }
                Err(_) => {
                    warn!("Graceful shutdown timed out after {:?}", timeout);
                    false
                }
            }
        } else {
            self.latch(status);
            false
        };

        let teardown = if graceful {
            Teardown::Graceful
        } else {
            let status = self.issue("deinitialize", |driver| driver.deinitialize(None));
            if !status.is_success() {
                error!("Forced reset returned {}", status);
            }
            Teardown::ForcedReset
        };

        let dispatcher = self.state.lock().dispatcher.take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop();
        }
        self.unconfigure();
        teardown
    }

    fn unconfigure(&self) {
        let status = self.issue("unconfigure", |driver| driver.unconfigure());
        if !status.is_success() {
            self.latch(status);
        }
    }

    /// Cycle the stack and put discovery back exactly as it was.
    ///
    /// Runs on a caller thread that holds the caller guard.
    pub(crate) fn emergency_recovery(self: &Arc<Self>) -> Result<()> {
        error!("Emergency recovery: restarting the contactless stack");
        self.transition(LifecycleState::Recovering)?;

        let (discovery, registration) = {
            let state = self.state.lock();
            (state.discovery, state.registration)
        };

        let teardown = self.stop_stack();
        info!("Recovery teardown: {}", teardown);

        if let Err(err) = self.start_stack() {
            error!("Recovery could not restart the stack: {}", err);
            self.transition(LifecycleState::Uninitialized)?;
            return Err(err);
        }

        {
            let mut state = self.state.lock();
            state.discovery = discovery;
            state.registration = registration;
        }
        let restarted = self.restart_polling();

        self.transition(LifecycleState::Ready)?;
        let recoveries = {
            let mut state = self.state.lock();
            state.recoveries += 1;
            state.recoveries
        };
        match &restarted {
            Ok(()) => warn!("Emergency recovery #{} complete", recoveries),
            Err(err) => error!("Emergency recovery #{} could not restart polling: {}", recoveries, err),
        }
        restarted
    }

    // ------------------------------------------------------------------
    // Sockets
    // ------------------------------------------------------------------

    pub(crate) fn track_socket(&self, socket: &Arc<SocketCore>) {
        let mut sockets = self.sockets.lock();
        sockets.retain(|tracked| tracked.strong_count() > 0);
        sockets.push(Arc::downgrade(socket));
    }

    /// Mark every live socket closed; the driver has already dropped them.
    pub(crate) fn close_tracked_sockets(&self) {
        let sockets = std::mem::take(&mut *self.sockets.lock());
        for socket in sockets.iter().filter_map(Weak::upgrade) {
            if socket.mark_closed() {
                debug!("Socket {} released with the link", socket.handle());
            }
        }
    }
}

/// A contactless stack session.
///
/// All public operations serialize on the caller guard: at most one runs at
/// a time, whichever thread calls it. [`Session::cancel`] is the exception.
/// Socket operations do not take the guard, so a socket blocked on the peer
/// never holds the session up.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use nfclink_bridge::{Session, SessionConfig, Teardown};
/// use nfclink_driver::mock::MockDriver;
///
/// let (driver, _handle) = MockDriver::new();
/// let (session, _events) = Session::new(Arc::new(driver), SessionConfig::default());
///
/// session.initialize().unwrap();
/// assert_eq!(session.deinitialize(), Teardown::Graceful);
/// ```
pub struct Session {
    pub(crate) shared: Arc<Shared>,
}

impl Session {
    /// Create an uninitialized session and the stream of its events.
    pub fn new(driver: Arc<dyn NfcDriver>, config: SessionConfig) -> (Self, SessionEvents) {
        let (events, receiver) = event::channel();
        let state = SessionState::new(&config);
        let shared = Arc::new(Shared {
            driver,
            guards: Arc::new(Guards::new()),
            config,
            state: Mutex::new(state),
            events,
            open: Mutex::new(None),
            sockets: Mutex::new(Vec::new()),
        });
        (Self { shared }, receiver)
    }

    /// Bring the stack up.
    ///
    /// # Errors
    ///
    /// Fails if the session is not uninitialized or if any mandatory step
    /// fails; the session is then uninitialized again.
    pub fn initialize(&self) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.transition(LifecycleState::Initializing)?;

        match self.shared.start_stack() {
            Ok(()) => {
                self.shared.transition(LifecycleState::Ready)?;
                Ok(())
            }
            Err(err) => {
                error!("Stack initialization failed: {}", err);
                self.shared.transition(LifecycleState::Uninitialized)?;
                Err(err)
            }
        }
    }

    /// Tear the stack down. Never fails; see [`Teardown`].
    pub fn deinitialize(&self) -> Teardown {
        let _caller = self.shared.guards.enter_caller();
        let state = self.shared.lifecycle();
        if state != LifecycleState::Ready {
            debug!("deinitialize() in state {}, nothing to tear down", state);
            return Teardown::Graceful;
        }

        if let Err(err) = self.shared.transition(LifecycleState::Deinitializing) {
            error!("{}", err);
        }
        let teardown = self.shared.stop_stack();
        if let Err(err) = self.shared.transition(LifecycleState::Uninitialized) {
            error!("{}", err);
        }
        info!("Contactless stack shut down ({})", teardown);
        teardown
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.shared.lifecycle()
    }

    /// Normalized code of the last latched driver failure.
    pub fn last_error(&self) -> i32 {
        normalize_error(self.last_status())
    }

    /// Raw status of the last latched driver failure.
    pub fn last_status(&self) -> NfcStatus {
        self.shared.state.lock().last_error
    }

    /// Capabilities reported during the last bring-up.
    pub fn capabilities(&self) -> Option<StackCapabilities> {
        self.shared.state.lock().capabilities.clone()
    }

    /// Number of completed emergency recoveries.
    pub fn recovery_count(&self) -> u32 {
        self.shared.state.lock().recoveries
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shared.lifecycle() == LifecycleState::Ready {
            debug!("Session dropped while ready, shutting down");
            self.deinitialize();
        }
    }
}
