//! # Ingress Plugin Transport
//!
//! The capability interface every ingress plugin exposes to the supervisor,
//! plus the production transport for it.
//!
//! ## Architecture
//!
//! ```text
//! plugins
//! ├── IngressPlugin         (capability trait: probe, info, routes, close)
//! ├── protocol              (newline-delimited JSON request/response frames)
//! ├── client                (lazy-connecting Unix socket client with retry)
//! └── server                (serves the protocol for a PluginHandler)
//! ```
//!
//! Supervisors never construct clients directly; they go through a
//! [`PluginClientFactory`] so tests can substitute in-process fakes.

pub mod client;
pub mod protocol;
pub mod server;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use client::SocketPluginClient;
pub use protocol::{PluginRequest, PluginResponse};
pub use server::{serve, PluginHandler};

use crate::config::ClientConfig;

/// Transport-level errors talking to a plugin process
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PluginError {
    #[error("plugin address is empty")]
    EmptyAddress,

    #[error("failed to stat socket {path}: {message}")]
    SocketUnavailable { path: String, message: String },

    #[error("failed to connect to plugin socket {path}: {message}")]
    Dial { path: String, message: String },

    #[error("timeout while {operation}: {last_error}")]
    Timeout {
        operation: String,
        last_error: String,
    },

    #[error("plugin client is closed")]
    Closed,

    #[error("plugin connection error: {0}")]
    Connection(String),

    #[error("plugin protocol error: {0}")]
    Protocol(String),

    #[error("plugin returned error: {0}")]
    Remote(String),
}

impl PluginError {
    pub(crate) fn timeout(operation: impl Into<String>, last_error: Option<&PluginError>) -> Self {
        PluginError::Timeout {
            operation: operation.into(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt completed".to_string()),
        }
    }
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Vendor identity reported by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfoResponse {
    /// Vendor/provider name
    pub name: String,
    pub plugin_version: String,
    #[serde(default)]
    pub api_versions: Vec<String>,
}

/// Capability set of an ingress plugin.
///
/// Every call takes its own bound; implementations must return
/// [`PluginError::Timeout`] rather than block past it.
#[async_trait]
pub trait IngressPlugin: Send + Sync + Debug {
    /// Lightweight liveness check
    async fn probe(&self, timeout: Duration) -> PluginResult<bool>;

    /// Vendor name and version
    async fn info(&self, timeout: Duration) -> PluginResult<PluginInfoResponse>;

    async fn create_routes(&self, alloc_id: &str, timeout: Duration) -> PluginResult<()>;

    async fn change_or_delete_routes(&self, alloc_id: &str, timeout: Duration)
        -> PluginResult<()>;

    /// Idempotent; safe on a client that never connected
    async fn close(&self) -> PluginResult<()>;
}

/// Builds plugin clients for a connection address
pub trait PluginClientFactory: Send + Sync + Debug {
    fn new_client(&self, address: &str) -> Arc<dyn IngressPlugin>;
}

/// Factory producing [`SocketPluginClient`]s
#[derive(Debug, Clone, Default)]
pub struct SocketClientFactory {
    config: ClientConfig,
}

impl SocketClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl PluginClientFactory for SocketClientFactory {
    fn new_client(&self, address: &str) -> Arc<dyn IngressPlugin> {
        Arc::new(SocketPluginClient::with_config(address, self.config.clone()))
    }
}
