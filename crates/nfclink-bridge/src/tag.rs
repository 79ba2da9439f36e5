//! Tag access: connection, presence, raw exchanges and NDEF.
//!
//! Every operation blocks until the driver callback arrives. Reads need the
//! maximum message length learned by [`Session::check_ndef`]; it is
//! forgotten when the tag is released.

use nfclink_core::NfcStatus;
use nfclink_core::constants::TRANSCEIVE_BUFFER_LEN;
use nfclink_driver::types::{RemoteHandle, TransceiveCommand};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::rendezvous::{completion, payload_completion, rendezvous};
use crate::session::{Session, Shared};
use crate::target::NfcTag;

impl Shared {
    /// One presence check. `Ok(false)` once the tag has left the field.
    fn presence_check(&self, target: RemoteHandle) -> Result<bool> {
        let (waiter, signal) = rendezvous();
        let status = self.issue("check_presence", |driver| {
            driver.check_presence(target, completion("check_presence", signal))
        });
        if !status.is_pending() {
            self.latch(status);
            return Err(BridgeError::rejected("check_presence", status));
        }
        let status = self.wait("check_presence", waiter, None)?;
        Ok(status.is_success())
    }
}

impl Session {
    /// Connect to a discovered tag.
    pub fn connect_tag(&self, tag: &NfcTag) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("connect_target", |driver| {
            driver.connect_target(tag.handle, payload_completion("connect_tag", signal))
        });
        self.shared.settle_payload("connect_tag", status, waiter)?;
        info!("Connected to {}", tag);
        Ok(())
    }

    /// Wait for the tag to leave the field, then release it.
    ///
    /// Blocks for as long as the tag answers presence checks. Polling
    /// resumes afterwards.
    pub fn disconnect_tag(&self, tag: &NfcTag) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let mut checks = 0u32;
        while self.shared.presence_check(tag.handle).unwrap_or(false) {
            checks += 1;
        }
        debug!("{} gone after {} presence checks", tag, checks);
        self.shared.release_target(tag.handle)
    }

    /// Check whether the tag still answers.
    pub fn is_tag_present(&self, tag: &NfcTag) -> Result<bool> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;
        self.shared.presence_check(tag.handle)
    }

    /// Exchange one frame with the tag and return its answer.
    ///
    /// For Mifare classic and Ultralight tags the first two bytes of `data`
    /// are the command and the block address.
    pub fn transceive(&self, tag: &NfcTag, data: &[u8]) -> Result<Vec<u8>> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (command, payload) = TransceiveCommand::frame(tag.target_type, data)
            .ok_or_else(|| BridgeError::rejected("transceive", NfcStatus::INVALID_PARAMETER))?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("transceive", |driver| {
            driver.transceive(
                tag.handle,
                command,
                payload.to_vec(),
                TRANSCEIVE_BUFFER_LEN,
                payload_completion("transceive", signal),
            )
        });
        self.shared.settle_payload("transceive", status, waiter)
    }

    /// Check whether the tag holds an NDEF area.
    ///
    /// Returns the maximum message length, or `None` if the tag is not NDEF
    /// formatted.
    pub fn check_ndef(&self, tag: &NfcTag) -> Result<Option<usize>> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("check_ndef", |driver| {
            driver.check_ndef(tag.handle, payload_completion("check_ndef", signal))
        });
        if !status.is_pending() {
            self.shared.latch(status);
            return Err(BridgeError::rejected("check_ndef", status));
        }
        let (status, max_len) = self.shared.wait("check_ndef", waiter, None)?;

        let max_len = status.is_success().then_some(max_len);
        self.shared.state.lock().ndef = max_len.map(|max_len| (tag.handle, max_len));
        match max_len {
            Some(max_len) => debug!("{}: NDEF, up to {} bytes", tag, max_len),
            None => debug!("{}: not NDEF ({})", tag, status),
        }
        Ok(max_len)
    }

    /// Read the NDEF message. The area must have been checked first.
    pub fn read_ndef(&self, tag: &NfcTag) -> Result<Vec<u8>> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let capacity = match self.shared.state.lock().ndef {
            Some((handle, max_len)) if handle == tag.handle => max_len,
            _ => return Err(BridgeError::NdefNotChecked(tag.handle)),
        };

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("read_ndef", |driver| {
            driver.read_ndef(tag.handle, capacity, payload_completion("read_ndef", signal))
        });
        self.shared.settle_payload("read_ndef", status, waiter)
    }

    /// Replace the NDEF message.
    pub fn write_ndef(&self, tag: &NfcTag, message: &[u8]) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let (waiter, signal) = rendezvous();
        let status = self.shared.issue("write_ndef", |driver| {
            driver.write_ndef(tag.handle, message.to_vec(), completion("write_ndef", signal))
        });
        self.shared.settle("write_ndef", status, waiter, None)?;
        info!("Wrote {} NDEF bytes to {}", message.len(), tag);
        Ok(())
    }
}
