//! Discovery control.
//!
//! Reader mode pushes the local link parameters, registers the standing
//! notification and transaction handlers, then starts the polling loop.
//! Polling results arrive as [`SessionEvent`]s.

use std::fmt;
use std::sync::{Arc, Weak};

use nfclink_core::NfcStatus;
use nfclink_core::constants::{
    PROPERTY_DISCOVERY_15693, PROPERTY_DISCOVERY_A, PROPERTY_DISCOVERY_B, PROPERTY_DISCOVERY_F,
    PROPERTY_DISCOVERY_NFCIP, PROPERTY_LLCP_LTO, PROPERTY_LLCP_MIU, PROPERTY_LLCP_OPT,
    PROPERTY_LLCP_WKS,
};
use nfclink_driver::traits::{NotificationHandler, TransactionHandler};
use nfclink_driver::types::{
    DiscoveryAction, DiscoveryConfig, PeerMode, Registration, RemoteDevice, RemoteHandle,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::event::SessionEvent;
use crate::rendezvous::{completion, logged, rendezvous};
use crate::session::{Session, Shared};
use crate::target::DiscoveredTarget;

/// Discovery modes, indexed like the per-mode state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryMode {
    TagReader = 0,
    NfcIp1 = 1,
    CardEmulation = 2,
}

impl DiscoveryMode {
    fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<i32> for DiscoveryMode {
    type Error = nfclink_core::Error;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(DiscoveryMode::TagReader),
            1 => Ok(DiscoveryMode::NfcIp1),
            2 => Ok(DiscoveryMode::CardEmulation),
            other => Err(nfclink_core::Error::UnknownDiscoveryMode(other)),
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryMode::TagReader => "TagReader",
            DiscoveryMode::NfcIp1 => "NfcIp1",
            DiscoveryMode::CardEmulation => "CardEmulation",
        };
        write!(f, "{}", name)
    }
}

/// Tunable discovery and link properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    LlcpLto,
    LlcpMiu,
    LlcpWks,
    LlcpOpt,
    DiscoveryA,
    DiscoveryB,
    /// FeliCa at both 212 and 424 kbit/s.
    DiscoveryF,
    Discovery15693,
    DiscoveryNfcIp,
}

impl TryFrom<i32> for Property {
    type Error = nfclink_core::Error;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            PROPERTY_LLCP_LTO => Ok(Property::LlcpLto),
            PROPERTY_LLCP_MIU => Ok(Property::LlcpMiu),
            PROPERTY_LLCP_WKS => Ok(Property::LlcpWks),
            PROPERTY_LLCP_OPT => Ok(Property::LlcpOpt),
            PROPERTY_DISCOVERY_A => Ok(Property::DiscoveryA),
            PROPERTY_DISCOVERY_B => Ok(Property::DiscoveryB),
            PROPERTY_DISCOVERY_F => Ok(Property::DiscoveryF),
            PROPERTY_DISCOVERY_15693 => Ok(Property::Discovery15693),
            PROPERTY_DISCOVERY_NFCIP => Ok(Property::DiscoveryNfcIp),
            other => Err(nfclink_core::Error::UnknownProperty(other)),
        }
    }
}

fn saturate<T: TryFrom<u32> + Copy>(value: u32, max: T) -> T {
    T::try_from(value).unwrap_or(max)
}

impl Shared {
    /// Push link parameters, register handlers and start polling with the
    /// current discovery configuration and registration.
    ///
    /// Polling start is not awaited; its callback only logs.
    pub(crate) fn restart_polling(self: &Arc<Self>) -> Result<()> {
        let (link_parameters, registration, discovery) = {
            let state = self.state.lock();
            (state.link_parameters, state.registration, state.discovery)
        };
        debug!("Local link parameters: {}", link_parameters);

        let (waiter, signal) = rendezvous();
        let status = self.issue("set_link_parameters", |driver| {
            driver.set_link_parameters(&link_parameters, completion("set_link_parameters", signal))
        });
        self.settle("set_link_parameters", status, waiter, None)?;

        let handler = notification_handler(Arc::downgrade(self));
        let status = self.issue("register_notification", |driver| {
            driver.register_notification(&registration, handler)
        });
        if !status.is_success() {
            self.latch(status);
            return Err(BridgeError::rejected("register_notification", status));
        }

        self.register_transaction_handler()?;
        self.configure_discovery(DiscoveryAction::Config, &discovery)
    }

    pub(crate) fn register_transaction_handler(self: &Arc<Self>) -> Result<()> {
        let handler = transaction_handler(Arc::downgrade(self));
        let status = self.issue("register_transaction_handler", |driver| {
            driver.register_transaction_handler(handler)
        });
        if !status.is_success() {
            self.latch(status);
            return Err(BridgeError::rejected("register_transaction_handler", status));
        }
        Ok(())
    }

    fn configure_discovery(&self, action: DiscoveryAction, config: &DiscoveryConfig) -> Result<()> {
        let status = self.issue("configure_discovery", |driver| {
            driver.configure_discovery(action, config, logged("configure_discovery"))
        });
        if !status.is_pending() {
            self.latch(status);
            return Err(BridgeError::rejected("configure_discovery", status));
        }
        Ok(())
    }

    /// Resume polling; a refusal leaves the stack untrusted and recovers it.
    pub(crate) fn resume_discovery(self: &Arc<Self>) -> Result<()> {
        let discovery = self.state.lock().discovery;
        match self.configure_discovery(DiscoveryAction::Resume, &discovery) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("Resuming discovery failed ({}), recovering", err);
                self.emergency_recovery()
            }
        }
    }

    /// Release a remote device. A device that is already gone counts as
    /// released; any other refusal resumes polling instead.
    pub(crate) fn release_target(self: &Arc<Self>, target: RemoteHandle) -> Result<()> {
        let (waiter, signal) = rendezvous();
        let status = self.issue("disconnect", |driver| {
            driver.disconnect(target, completion("disconnect", signal))
        });
        self.forget_target(target);

        if status == NfcStatus::TARGET_NOT_CONNECTED {
            debug!("{} already released", target);
            return Ok(());
        }
        if !status.is_pending() {
            warn!("Disconnect of {} refused ({}), resuming discovery", target, status);
            self.latch(status);
            return self.resume_discovery();
        }
        self.settle("disconnect", status, waiter, None)
    }

    fn forget_target(&self, target: RemoteHandle) {
        let mut state = self.state.lock();
        if state.llcp_handle == Some(target) {
            state.llcp_handle = None;
        }
        if state.ndef.is_some_and(|(handle, _)| handle == target) {
            state.ndef = None;
        }
    }

    fn on_discovery(&self, status: NfcStatus, devices: Vec<RemoteDevice>) {
        if status == NfcStatus::DESELECTED {
            info!("Target deselected");
            self.events.emit(SessionEvent::TargetDeselected);
            return;
        }
        if !(status.is_success()
            || status == NfcStatus::MULTIPLE_PROTOCOLS
            || status == NfcStatus::MULTIPLE_TAGS)
        {
            warn!("Discovery notification: {}", status);
            self.latch(status);
            return;
        }
        if devices.len() > 1 {
            debug!("{} devices in the field, reporting the first", devices.len());
        }
        let Some(device) = devices.first() else {
            warn!("Discovery notification without a device");
            return;
        };

        let target = DiscoveredTarget::from_remote(device);
        {
            let mut state = self.state.lock();
            if target.is_peer() {
                state.llcp_handle = Some(target.handle());
            }
            state.last_target = Some(target.clone());
        }

        match target {
            DiscoveredTarget::Tag(tag) => {
                info!("Discovered {}", tag);
                self.events.emit(SessionEvent::TagDiscovered(tag));
            }
            DiscoveredTarget::Peer(peer) => {
                info!("Discovered peer {} ({:?})", peer.handle, peer.mode);
                self.events.emit(SessionEvent::PeerDiscovered(peer));
            }
        }
    }

    fn on_transaction(&self, aid: Vec<u8>) {
        info!("Secure element transaction, AID {} bytes", aid.len());
        self.events.emit(SessionEvent::Transaction { aid });
    }

    fn apply_property(&self, property: Property, value: u32) {
        let enabled = value != 0;
        let mut state = self.state.lock();
        match property {
            Property::LlcpLto => state.link_parameters.lto = saturate(value, u8::MAX),
            Property::LlcpMiu => state.link_parameters.miu = saturate(value, u16::MAX),
            Property::LlcpWks => state.link_parameters.wks = saturate(value, u16::MAX),
            Property::LlcpOpt => state.link_parameters.option = saturate(value, u8::MAX),
            Property::DiscoveryA => state.discovery.technologies.iso14443a = enabled,
            Property::DiscoveryB => state.discovery.technologies.iso14443b = enabled,
            Property::DiscoveryF => {
                state.discovery.technologies.felica212 = enabled;
                state.discovery.technologies.felica424 = enabled;
            }
            Property::Discovery15693 => state.discovery.technologies.iso15693 = enabled,
            Property::DiscoveryNfcIp => state.discovery.technologies.nfc_active = enabled,
        }
        debug!("Property {:?} set to {}", property, value);
    }
}

fn notification_handler(session: Weak<Shared>) -> NotificationHandler {
    Arc::new(move |status, devices| {
        if let Some(shared) = session.upgrade() {
            shared.on_discovery(status, devices);
        }
    })
}

fn transaction_handler(session: Weak<Shared>) -> TransactionHandler {
    Arc::new(move |aid| {
        if let Some(shared) = session.upgrade() {
            shared.on_transaction(aid);
        }
    })
}

impl Session {
    /// Enable a discovery mode.
    ///
    /// `TagReader` starts the polling loop; `CardEmulation` only registers
    /// the transaction handler.
    ///
    /// # Errors
    ///
    /// `NfcIp1` cannot be enabled on its own and fails with
    /// [`BridgeError::UnsupportedDiscoveryMode`].
    pub fn enable_discovery(&self, mode: DiscoveryMode) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        match mode {
            DiscoveryMode::TagReader => {
                {
                    let mut state = self.shared.state.lock();
                    state.discovery.disable_card_emulation = false;
                    state.discovery.peer_mode = PeerMode::Passive212;
                    state.discovery.duration_ms = self.shared.config.discovery_duration_ms;
                    state.discovery.polling_disabled = false;
                    state.discovery.nfcip_target_disabled = false;
                    state.registration = Registration::all();
                }
                self.shared.restart_polling()?;
            }
            DiscoveryMode::CardEmulation => self.shared.register_transaction_handler()?,
            DiscoveryMode::NfcIp1 => {
                return Err(BridgeError::UnsupportedDiscoveryMode(mode.to_string()));
            }
        }

        self.shared.state.lock().mode_enabled[mode.index()] = true;
        info!("Discovery mode {} enabled", mode);
        Ok(())
    }

    /// Stop the polling loop. Not awaited.
    pub fn disable_discovery(&self) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let stopped = self.shared.state.lock().discovery.stopped();
        let status = self.shared.issue("configure_discovery", |driver| {
            driver.configure_discovery(DiscoveryAction::Config, &stopped, logged("disable_discovery"))
        });
        if !status.is_pending() {
            self.shared.latch(status);
            return Err(BridgeError::rejected("disable_discovery", status));
        }
        self.shared.state.lock().mode_enabled[DiscoveryMode::TagReader.index()] = false;
        Ok(())
    }

    /// Mark a mode disabled without touching the driver.
    pub fn disable_discovery_mode(&self, mode: DiscoveryMode) {
        let _caller = self.shared.guards.enter_caller();
        self.shared.state.lock().mode_enabled[mode.index()] = false;
        debug!("Discovery mode {} disabled", mode);
    }

    pub fn is_discovery_mode_enabled(&self, mode: DiscoveryMode) -> bool {
        self.shared.state.lock().mode_enabled[mode.index()]
    }

    /// Current discovery configuration.
    pub fn discovery_config(&self) -> DiscoveryConfig {
        self.shared.state.lock().discovery
    }

    /// Resume polling after a target was released.
    ///
    /// If the driver refuses, the stack is recovered and polling restarted.
    pub fn resume_discovery(&self) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;
        self.shared.resume_discovery()
    }

    /// Release a remote device and keep polling.
    pub fn disconnect_target(&self, target: RemoteHandle) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        self.shared.release_target(target)
    }

    pub fn set_property(&self, property: Property, value: u32) {
        let _caller = self.shared.guards.enter_caller();
        self.shared.apply_property(property, value);
    }

    /// Set a property by its numeric id; unknown ids are logged and ignored.
    pub fn set_property_raw(&self, property: i32, value: u32) {
        let _caller = self.shared.guards.enter_caller();
        match Property::try_from(property) {
            Ok(property) => self.shared.apply_property(property, value),
            Err(err) => warn!("{}, ignored", err),
        }
    }

    /// Last discovered target, kept until the next discovery.
    pub fn last_target(&self) -> Option<DiscoveredTarget> {
        self.shared.state.lock().last_target.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Some(DiscoveryMode::TagReader))]
    #[case(1, Some(DiscoveryMode::NfcIp1))]
    #[case(2, Some(DiscoveryMode::CardEmulation))]
    #[case(3, None)]
    #[case(-1, None)]
    fn test_discovery_mode_from_raw(#[case] raw: i32, #[case] expected: Option<DiscoveryMode>) {
        assert_eq!(DiscoveryMode::try_from(raw).ok(), expected);
    }

    #[rstest]
    #[case(0, Property::LlcpLto)]
    #[case(1, Property::LlcpMiu)]
    #[case(2, Property::LlcpWks)]
    #[case(3, Property::LlcpOpt)]
    #[case(4, Property::DiscoveryA)]
    #[case(5, Property::DiscoveryB)]
    #[case(6, Property::DiscoveryF)]
    #[case(7, Property::Discovery15693)]
    #[case(8, Property::DiscoveryNfcIp)]
    fn test_property_from_raw(#[case] raw: i32, #[case] expected: Property) {
        assert_eq!(Property::try_from(raw), Ok(expected));
    }

    #[test]
    fn test_unknown_property() {
        assert_eq!(
            Property::try_from(9),
            Err(nfclink_core::Error::UnknownProperty(9))
        );
    }

    #[test]
    fn test_mode_index_matches_table() {
        assert_eq!(DiscoveryMode::TagReader.index(), 0);
        assert_eq!(DiscoveryMode::CardEmulation.index(), 2);
    }

    #[test]
    fn test_saturate() {
        assert_eq!(saturate(100, u8::MAX), 100u8);
        assert_eq!(saturate(300, u8::MAX), u8::MAX);
        assert_eq!(saturate(70_000, u16::MAX), u16::MAX);
    }

    proptest! {
        #[test]
        fn prop_saturate_clamps(value in any::<u32>()) {
            let clamped = saturate(value, u16::MAX);
            prop_assert_eq!(u32::from(clamped), value.min(u32::from(u16::MAX)));
        }
    }
}
