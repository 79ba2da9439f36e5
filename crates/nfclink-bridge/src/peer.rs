//! Peer link control, blocking opens and raw peer exchanges.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use nfclink_core::NfcStatus;
use nfclink_core::constants::TRANSCEIVE_BUFFER_LEN;
use nfclink_driver::traits::{LinkStatusHandler, NotificationHandler};
use nfclink_driver::types::{
    LinkStatus, Registration, RemoteDevice, RemoteHandle, TransceiveCommand,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::event::{EventSender, SessionEvent};
use crate::rendezvous::{Signal, bound, completion, payload_completion, rendezvous};
use crate::session::{OpenOutcome, Session, Shared};
use crate::target::{DiscoveredTarget, NfcTag, P2pDevice};

/// State of the peer link as last reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkState {
    /// No link has been activated yet.
    #[default]
    Inactive,
    Activated,
    Deactivated,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Inactive => "Inactive",
            LinkState::Activated => "Activated",
            LinkState::Deactivated => "Deactivated",
        };
        write!(f, "{}", name)
    }
}

fn is_peer(device: &RemoteDevice) -> bool {
    device.device_type.is_peer()
}

fn is_tag(device: &RemoteDevice) -> bool {
    !device.device_type.is_peer()
}

/// Notification handler that resolves one open.
///
/// Several protocols or tags in the field still count as a discovery.
fn open_handler(
    operation: &'static str,
    accept: fn(&RemoteDevice) -> bool,
    events: EventSender,
    signal: Signal<OpenOutcome>,
) -> NotificationHandler {
    Arc::new(move |status, devices| {
        let outcome = if status.is_success()
            || status == NfcStatus::MULTIPLE_PROTOCOLS
            || status == NfcStatus::MULTIPLE_TAGS
        {
            match devices.into_iter().find(|device| accept(device)) {
                Some(device) => Ok(device),
                None => return,
            }
        } else if status == NfcStatus::DESELECTED {
            info!("Target deselected while {} waits", operation);
            events.emit(SessionEvent::TargetDeselected);
            return;
        } else {
            Err(status)
        };
        if !signal.complete(outcome) {
            debug!("{} notification with no waiting open, discarded", operation);
        }
    })
}

fn link_status_handler(session: Weak<Shared>, target: RemoteHandle) -> LinkStatusHandler {
    Arc::new(move |status| {
        if let Some(shared) = session.upgrade() {
            shared.on_link_status(target, status);
        }
    })
}

impl Shared {
    /// Register for one kind of remote device and block until one shows up.
    ///
    /// The registration stays in effect afterwards and survives recovery.
    fn wait_for_target(
        &self,
        operation: &'static str,
        registration: Registration,
        accept: fn(&RemoteDevice) -> bool,
        timeout: Duration,
    ) -> Result<DiscoveredTarget> {
        let (waiter, signal) = rendezvous();
        *self.open.lock() = Some(signal.clone());
        self.state.lock().registration = registration;

        let handler = open_handler(operation, accept, self.events.clone(), signal);
        let status = self.issue("register_notification", |driver| {
            driver.register_notification(&registration, handler)
        });
        if !status.is_success() {
            self.open.lock().take();
            self.latch(status);
            return Err(BridgeError::rejected(operation, status));
        }

        let outcome = self.wait(operation, waiter, bound(timeout));
        self.open.lock().take();
        let device = outcome?.map_err(|status| {
            self.latch(status);
            BridgeError::failed(operation, status)
        })?;

        let target = DiscoveredTarget::from_remote(&device);
        {
            let mut state = self.state.lock();
            if target.is_peer() {
                state.llcp_handle = Some(target.handle());
            }
            state.last_target = Some(target.clone());
        }
        info!("{}: {}", operation, target.handle());
        Ok(target)
    }

    fn on_link_status(&self, target: RemoteHandle, status: LinkStatus) {
        match status {
            LinkStatus::Activated => {
                self.state.lock().link_state = LinkState::Activated;
                info!("Peer link with {} activated", target);
                match self.query("remote_link_parameters", |driver| {
                    driver.remote_link_parameters(target)
                }) {
                    Ok(params) => info!("Remote link parameters: {}", params),
                    Err(status) => warn!("Remote link parameters unavailable: {}", status),
                }
            }
            LinkStatus::Deactivated => {
                self.state.lock().link_state = LinkState::Deactivated;
                info!("Peer link with {} deactivated", target);
                self.close_tracked_sockets();
                self.events.emit(SessionEvent::LinkDeactivated);
            }
        }
    }
}

impl Session {
    /// Wait for a peer to enter the field. A zero timeout waits forever.
    pub fn open_peer_connection(&self, timeout: Duration) -> Result<P2pDevice> {
        const OPERATION: &str = "open_peer_connection";
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        match self.shared.wait_for_target(OPERATION, Registration::peers(), is_peer, timeout)? {
            DiscoveredTarget::Peer(peer) => Ok(peer),
            DiscoveredTarget::Tag(_) => Err(BridgeError::failed(OPERATION, NfcStatus::INVALID_DEVICE)),
        }
    }

    /// Wait for a tag to enter the field. A zero timeout waits forever.
    pub fn open_tag_connection(&self, timeout: Duration) -> Result<NfcTag> {
        const OPERATION: &str = "open_tag_connection";
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        match self.shared.wait_for_target(OPERATION, Registration::tags(), is_tag, timeout)? {
            DiscoveredTarget::Tag(tag) => Ok(tag),
            DiscoveredTarget::Peer(_) => Err(BridgeError::failed(OPERATION, NfcStatus::INVALID_DEVICE)),
        }
    }

    /// Unblock a pending open; it fails with [`BridgeError::Cancelled`].
    ///
    /// Does not wait for the caller guard. Returns `false` if no open was
    /// waiting.
    pub fn cancel(&self) -> bool {
        let signal = self.shared.open.lock().take();
        match signal {
            Some(signal) if signal.cancel() => {
                info!("Pending open cancelled");
                true
            }
            _ => {
                debug!("cancel() with no pending open");
                false
            }
        }
    }

    /// Check link-layer compliance of the discovered peer.
    ///
    /// Also installs the standing link-status handler for the link's life.
    pub fn check_link_compliance(&self) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;
        let target = self
            .shared
            .state
            .lock()
            .llcp_handle
            .ok_or(BridgeError::NoPeerLink)?;

        let (waiter, signal) = rendezvous();
        let on_link_status = link_status_handler(Arc::downgrade(&self.shared), target);
        let status = self.shared.issue("check_link", |driver| {
            driver.check_link(target, completion("check_link", signal), on_link_status)
        });
        if !(status.is_pending() || status.is_success()) {
            self.shared.latch(status);
            return Err(BridgeError::rejected("check_link", status));
        }

        let status = self.shared.wait("check_link", waiter, None)?;
        if !status.is_success() {
            self.shared.latch(status);
            return Err(BridgeError::failed("check_link", status));
        }
        Ok(())
    }

    /// Activate the peer link. Synchronous.
    pub fn activate_link(&self) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;
        let target = self
            .shared
            .state
            .lock()
            .llcp_handle
            .ok_or(BridgeError::NoPeerLink)?;

        let status = self
            .shared
            .issue("activate_link", |driver| driver.activate_link(target));
        if !status.is_success() {
            self.shared.latch(status);
            return Err(BridgeError::rejected("activate_link", status));
        }
        Ok(())
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.state.lock().link_state
    }

    /// Connect to a discovered peer.
    ///
    /// The general bytes the driver returns replace the ones seen at
    /// discovery when it returns any.
    pub fn connect_peer(&self, peer: &mut P2pDevice) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("connect_target", |driver| {
            driver.connect_target(peer.handle, payload_completion("connect_peer", signal))
        });
        let general_bytes = self.shared.settle_payload("connect_peer", status, waiter)?;
        if !general_bytes.is_empty() {
            debug!("Peer {}: {} general bytes", peer.handle, general_bytes.len());
            peer.general_bytes = general_bytes;
        }
        Ok(())
    }

    /// Release a peer and keep polling.
    pub fn disconnect_peer(&self, peer: &P2pDevice) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;
        self.shared.release_target(peer.handle)
    }

    /// Exchange one raw frame with a peer acting as target.
    pub fn peer_transceive(&self, peer: &P2pDevice, data: &[u8]) -> Result<Vec<u8>> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("transceive", |driver| {
            driver.transceive(
                peer.handle,
                TransceiveCommand::Raw,
                data.to_vec(),
                TRANSCEIVE_BUFFER_LEN,
                payload_completion("peer_transceive", signal),
            )
        });
        self.shared.settle_payload("peer_transceive", status, waiter)
    }

    /// Send a frame to a peer acting as initiator.
    pub fn peer_send(&self, peer: &P2pDevice, data: &[u8]) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("peer_send", |driver| {
            driver.peer_send(peer.handle, data.to_vec(), completion("peer_send", signal))
        });
        self.shared.settle("peer_send", status, waiter, None)
    }

    /// Block until a peer acting as initiator sends a frame.
    pub fn peer_receive(&self, peer: &P2pDevice) -> Result<Vec<u8>> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("peer_receive", |driver| {
            driver.peer_receive(peer.handle, payload_completion("peer_receive", signal))
        });
        self.shared.settle_payload("peer_receive", status, waiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use crate::rendezvous::WaitError;
    use nfclink_driver::types::RemoteDeviceType;

    fn device(device_type: RemoteDeviceType) -> RemoteDevice {
        RemoteDevice::new(RemoteHandle(3), device_type)
    }

    #[test]
    fn test_open_handler_skips_unwanted_devices() {
        let (waiter, signal) = rendezvous();
        let (events, _rx) = event::channel();
        let handler = open_handler("open_peer_connection", is_peer, events, signal);

        handler(NfcStatus::SUCCESS, vec![device(RemoteDeviceType::Mifare)]);
        handler(NfcStatus::DESELECTED, Vec::new());
        assert_eq!(
            waiter.wait(Some(Duration::from_millis(10))),
            Err(WaitError::TimedOut)
        );
    }

    #[test]
    fn test_open_handler_delivers_first_match() {
        let (waiter, signal) = rendezvous();
        let (events, _rx) = event::channel();
        let handler = open_handler("open_tag_connection", is_tag, events, signal);

        handler(
            NfcStatus::SUCCESS,
            vec![device(RemoteDeviceType::NfcIp1Target), device(RemoteDeviceType::Felica)],
        );
        let outcome = waiter.wait(None).unwrap();
        assert_eq!(outcome.unwrap().device_type, RemoteDeviceType::Felica);
    }

    #[test]
    fn test_open_handler_reports_failure() {
        let (waiter, signal) = rendezvous();
        let (events, _rx) = event::channel();
        let handler = open_handler("open_tag_connection", is_tag, events, signal);

        handler(NfcStatus::RF_TIMEOUT, Vec::new());
        assert_eq!(waiter.wait(None).unwrap(), Err(NfcStatus::RF_TIMEOUT));
    }

    #[test]
    fn test_open_handler_accepts_multiple_protocols() {
        let (waiter, signal) = rendezvous();
        let (events, _rx) = event::channel();
        let handler = open_handler("open_tag_connection", is_tag, events, signal);

        handler(
            NfcStatus::MULTIPLE_PROTOCOLS,
            vec![device(RemoteDeviceType::Iso14443_4A)],
        );
        let outcome = waiter.wait(None).unwrap();
        assert_eq!(outcome.unwrap().device_type, RemoteDeviceType::Iso14443_4A);
    }

    #[test]
    fn test_open_handler_accepts_multiple_tags() {
        let (waiter, signal) = rendezvous();
        let (events, _rx) = event::channel();
        let handler = open_handler("open_tag_connection", is_tag, events, signal);

        handler(
            NfcStatus::MULTIPLE_TAGS,
            vec![device(RemoteDeviceType::Mifare), device(RemoteDeviceType::Felica)],
        );
        let outcome = waiter.wait(None).unwrap();
        assert_eq!(outcome.unwrap().device_type, RemoteDeviceType::Mifare);
    }

    #[test]
    fn test_open_handler_reports_deselect() {
        let (waiter, signal) = rendezvous::<OpenOutcome>();
        let (events, mut rx) = event::channel();
        let handler = open_handler("open_peer_connection", is_peer, events, signal.clone());

        handler(NfcStatus::DESELECTED, Vec::new());
        assert_eq!(rx.try_recv(), Some(SessionEvent::TargetDeselected));
        assert!(signal.is_live());
        drop(waiter);
    }

    #[test]
    fn test_link_state_default() {
        assert_eq!(LinkState::default(), LinkState::Inactive);
        assert_eq!(LinkState::Deactivated.to_string(), "Deactivated");
    }
}
