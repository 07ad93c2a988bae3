//! # Error Types
//!
//! Crate-level error handling. Transport failures ([`PluginError`]) and
//! configuration failures ([`ConfigurationError`]) convert into
//! [`IngressError`] so callers can propagate with `?`.

use thiserror::Error;

pub use crate::config::ConfigurationError;
pub use crate::plugins::PluginError;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Registry error: {operation}: {message}")]
    Registry { operation: String, message: String },

    #[error("{plugin_type} plugin '{plugin_id}' did not become ready: {message}")]
    PluginNotReady {
        plugin_type: String,
        plugin_id: String,
        message: String,
    },

    #[error("Failed to prepare socket mount point {path}: {message}")]
    MountSetup { path: String, message: String },

    #[error("Task lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {operation} did not complete within {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl IngressError {
    pub fn registry(operation: impl Into<String>, message: impl Into<String>) -> Self {
        IngressError::Registry {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngressError>;
