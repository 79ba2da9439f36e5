//! Secure element selection for card emulation.

use nfclink_driver::types::{SecureElementHandle, SecureElementMode};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::session::Session;

impl Session {
    /// Handles of the attached secure elements.
    pub fn secure_elements(&self) -> Result<Vec<SecureElementHandle>> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        let secure_elements = self
            .shared
            .query("secure_elements", |driver| driver.secure_elements())
            .map_err(|status| {
                self.shared.latch(status);
                BridgeError::rejected("secure_elements", status)
            })?;
        Ok(secure_elements.into_iter().map(|se| se.handle).collect())
    }

    /// Route `handle` to the RF field.
    pub fn select_secure_element(&self, handle: SecureElementHandle) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        self.shared
            .set_secure_element_mode(handle, SecureElementMode::Virtual)?;
        self.shared.state.lock().secure_element = Some(handle);
        info!("Secure element {} selected", handle);
        Ok(())
    }

    /// Switch `handle` off again.
    pub fn deselect_secure_element(&self, handle: SecureElementHandle) -> Result<()> {
        let _caller = self.shared.guards.enter_caller();
        self.shared.ensure_ready()?;

        self.shared
            .set_secure_element_mode(handle, SecureElementMode::Off)?;
        {
            let mut state = self.shared.state.lock();
            if state.secure_element == Some(handle) {
                state.secure_element = None;
            }
        }
        info!("Secure element {} deselected", handle);
        Ok(())
    }

    /// The secure element currently routed to the field, if any.
    pub fn selected_secure_element(&self) -> Option<SecureElementHandle> {
        self.shared.state.lock().secure_element
    }
}
