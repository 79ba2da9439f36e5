//! Session configuration.

use std::time::Duration;

use nfclink_core::constants::{DEFAULT_DEINIT_TIMEOUT_MS, DEFAULT_DISCOVERY_DURATION_MS};
use nfclink_driver::types::{DiscoveryConfig, DriverConfig, LinkParameters, LinkType, Technologies};
use serde::{Deserialize, Serialize};

/// Configuration for a [`Session`](crate::Session).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use nfclink_bridge::SessionConfig;
///
/// let config: SessionConfig = serde_json::from_str(r#"{ "deinit_timeout_ms": 500 }"#).unwrap();
/// assert_eq!(config.deinit_timeout().as_millis(), 500);
/// assert_eq!(config.discovery_duration_ms, 300_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Physical link to the controller.
    pub link_type: LinkType,

    /// Bound on the graceful teardown wait before forcing a reset.
    pub deinit_timeout_ms: u64,

    /// Polling loop duration used when discovery starts.
    pub discovery_duration_ms: u32,

    /// Local peer link parameters pushed when discovery starts.
    pub link_parameters: LinkParameters,

    /// Technologies polled for.
    pub technologies: Technologies,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            link_type: LinkType::default(),
            deinit_timeout_ms: DEFAULT_DEINIT_TIMEOUT_MS,
            discovery_duration_ms: DEFAULT_DISCOVERY_DURATION_MS,
            link_parameters: LinkParameters::default(),
            technologies: Technologies::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_link_type(mut self, link_type: LinkType) -> Self {
        self.link_type = link_type;
        self
    }

    /// Set the link from a device port name such as `"COM3"` or `"I2C"`.
    pub fn with_port_name(self, port: &str) -> Self {
        self.with_link_type(LinkType::from_port_name(port))
    }

    pub fn with_deinit_timeout(mut self, timeout: Duration) -> Self {
        self.deinit_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_link_parameters(mut self, link_parameters: LinkParameters) -> Self {
        self.link_parameters = link_parameters;
        self
    }

    pub fn with_technologies(mut self, technologies: Technologies) -> Self {
        self.technologies = technologies;
        self
    }

    pub fn deinit_timeout(&self) -> Duration {
        Duration::from_millis(self.deinit_timeout_ms)
    }

    pub(crate) fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            link_type: self.link_type,
        }
    }

    /// Discovery configuration a fresh session starts from.
    pub(crate) fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            duration_ms: self.discovery_duration_ms,
            technologies: self.technologies,
            ..DiscoveryConfig::default()
        }
    }
}
