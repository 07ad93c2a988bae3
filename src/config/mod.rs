//! # Ingress Supervision Configuration
//!
//! Typed configuration for the plugin manager, the plugin socket client and
//! the task supervisor hook. Every field has a default equal to the matching
//! constant in [`crate::constants::timing`], so an empty configuration source
//! yields the stock behaviour.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ingress_supervisor::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from(Some("config/ingress.toml"))?;
//! let resync = manager.config().manager.resync_period();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{timing, INGRESS_PLUGIN_TYPE};

/// Root configuration for the ingress supervision subsystem
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct IngressConfig {
    /// Root of the per-allocation plugin socket directories
    pub client_state_dir: PathBuf,

    /// Set manager and instance manager settings
    pub manager: ManagerConfig,

    /// Plugin socket client settings
    pub client: ClientConfig,

    /// Task supervisor hook settings
    pub supervisor: SupervisorConfig,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            client_state_dir: PathBuf::from("/var/lib/ingress-supervisor/client"),
            manager: ManagerConfig::default(),
            client: ClientConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    pub plugin_type: String,
    /// Full resync period; zero means "use the default"
    pub plugin_resync_period_ms: u64,
    pub fingerprint_interval_ms: u64,
    pub shutdown_fingerprint_timeout_ms: u64,
    pub wait_for_plugin_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            plugin_type: INGRESS_PLUGIN_TYPE.to_string(),
            plugin_resync_period_ms: timing::PLUGIN_RESYNC_PERIOD.as_millis() as u64,
            fingerprint_interval_ms: timing::FINGERPRINT_INTERVAL.as_millis() as u64,
            shutdown_fingerprint_timeout_ms: timing::SHUTDOWN_FINGERPRINT_TIMEOUT.as_millis()
                as u64,
            wait_for_plugin_timeout_ms: timing::WAIT_FOR_PLUGIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ManagerConfig {
    pub fn resync_period(&self) -> Duration {
        if self.plugin_resync_period_ms == 0 {
            timing::PLUGIN_RESYNC_PERIOD
        } else {
            Duration::from_millis(self.plugin_resync_period_ms)
        }
    }

    pub fn fingerprint_interval(&self) -> Duration {
        Duration::from_millis(self.fingerprint_interval_ms)
    }

    pub fn shutdown_fingerprint_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_fingerprint_timeout_ms)
    }

    pub fn wait_for_plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_for_plugin_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_retry_interval_ms: u64,
    pub dial_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_retry_interval_ms: timing::CONNECT_RETRY_INTERVAL.as_millis() as u64,
            dial_timeout_ms: timing::DIAL_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub startup_timeout_ms: u64,
    pub startup_retry_interval_ms: u64,
    pub monitor_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Directory the socket mount appears at inside the task
    pub task_socket_dir: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: timing::STARTUP_TIMEOUT.as_millis() as u64,
            startup_retry_interval_ms: timing::STARTUP_RETRY_INTERVAL.as_millis() as u64,
            monitor_interval_ms: timing::MONITOR_INTERVAL.as_millis() as u64,
            probe_timeout_ms: timing::PROBE_TIMEOUT.as_millis() as u64,
            stop_timeout_ms: timing::SUPERVISOR_STOP_TIMEOUT.as_millis() as u64,
            task_socket_dir: PathBuf::from("/opt"),
        }
    }
}

impl SupervisorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_retry_interval(&self) -> Duration {
        Duration::from_millis(self.startup_retry_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl IngressConfig {
    /// Validate intervals and names. Called by the loader after merging sources.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.manager.plugin_type.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "manager.plugin_type",
                "manager configuration",
            ));
        }

        let non_zero = [
            ("manager.fingerprint_interval_ms", self.manager.fingerprint_interval_ms),
            (
                "manager.shutdown_fingerprint_timeout_ms",
                self.manager.shutdown_fingerprint_timeout_ms,
            ),
            ("manager.wait_for_plugin_timeout_ms", self.manager.wait_for_plugin_timeout_ms),
            ("client.connect_retry_interval_ms", self.client.connect_retry_interval_ms),
            ("client.dial_timeout_ms", self.client.dial_timeout_ms),
            ("supervisor.startup_timeout_ms", self.supervisor.startup_timeout_ms),
            (
                "supervisor.startup_retry_interval_ms",
                self.supervisor.startup_retry_interval_ms,
            ),
            ("supervisor.monitor_interval_ms", self.supervisor.monitor_interval_ms),
            ("supervisor.probe_timeout_ms", self.supervisor.probe_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "interval must be greater than 0",
                ));
            }
        }

        if self.client.dial_timeout_ms > self.client.connect_retry_interval_ms {
            return Err(ConfigurationError::invalid_value(
                "client.dial_timeout_ms",
                self.client.dial_timeout_ms.to_string(),
                "dial timeout must not exceed the connect retry interval",
            ));
        }

        if self.client_state_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "client_state_dir",
                "root configuration",
            ));
        }

        Ok(())
    }
}
