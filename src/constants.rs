//! # Constants
//!
//! Fixed names, intervals and timeouts shared by the ingress supervision
//! subsystem. Every interval here is also the default of the matching
//! [`crate::config::IngressConfig`] field.

use std::time::Duration;

/// Plugin type string used for ingress plugins in the dynamic registry.
pub const INGRESS_PLUGIN_TYPE: &str = "ingress";

/// File name of the plugin socket inside its mount directory.
pub const INGRESS_SOCKET_NAME: &str = "ingress.sock";

/// Environment variable pointing the workload at its socket.
pub const INGRESS_ENDPOINT_ENV: &str = "INGRESS_ENDPOINT";

/// Options key carrying the vendor-reported provider name.
pub const OPTION_PROVIDER: &str = "Provider";

/// Options key carrying an internal-class load balancer configuration path.
pub const OPTION_LB_CONF_PATH: &str = "LBConfPath";

/// Node event subsystem name.
pub const NODE_EVENT_SUBSYSTEM: &str = "Ingress";

/// Description carried by a snapshot before any probe has completed.
pub const INITIAL_FINGERPRINT_DESCRIPTION: &str = "initial fingerprint not completed";

pub mod timing {
    use super::Duration;

    /// Interval between instance manager fingerprint cycles.
    pub const FINGERPRINT_INTERVAL: Duration = Duration::from_secs(3);

    /// Bound on the final fingerprint run during instance shutdown.
    pub const SHUTDOWN_FINGERPRINT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Full resync period of the set manager against the registry.
    pub const PLUGIN_RESYNC_PERIOD: Duration = Duration::from_secs(30);

    /// Upper bound for `wait_for_plugin`.
    pub const WAIT_FOR_PLUGIN_TIMEOUT: Duration = Duration::from_secs(60);

    /// Retry interval while a plugin socket is missing or refusing connections.
    pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

    /// Bound on a single dial attempt.
    pub const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

    /// Deadline for a supervised plugin to become healthy after poststart.
    pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

    /// Probe retry interval during the startup phase.
    pub const STARTUP_RETRY_INTERVAL: Duration = Duration::from_secs(5);

    /// Probe interval once the plugin is registered.
    pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

    /// Bound on one supervisor probe.
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Bound on waiting for the supervisor loop to exit on stop.
    pub const SUPERVISOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);
}

pub mod query {
    use super::Duration;

    /// Default wait for a blocking query.
    pub const DEFAULT_MAX_QUERY_TIME: Duration = Duration::from_secs(300);

    /// Hard cap on a blocking query wait.
    pub const MAX_QUERY_TIME_CAP: Duration = Duration::from_secs(600);
}
