//! # Dynamic Plugin Registry
//!
//! Directory of plugins that run as workloads on this node, keyed by plugin
//! type and name, with change notifications.
//!
//! Task supervisor hooks register into it once their plugin is healthy; the
//! ingress manager consumes its update stream and periodically lists it. The
//! registry is shared by many tasks and must be internally synchronized;
//! [`InMemoryRegistry`] is the node-local implementation.

pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::broadcast;

pub use registry::InMemoryRegistry;

use crate::constants::OPTION_PROVIDER;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PluginConnectionInfo {
    /// Host-side path of the plugin's Unix socket
    pub socket_path: String,
}

/// One running plugin. Immutable once registered; a new allocation replaces
/// the entry wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub plugin_type: String,
    pub name: String,
    pub version: String,
    pub connection_info: Option<PluginConnectionInfo>,
    /// Allocation hosting the plugin process
    pub alloc_id: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl PluginInfo {
    pub fn socket_path(&self) -> &str {
        self.connection_info
            .as_ref()
            .map(|c| c.socket_path.as_str())
            .unwrap_or_default()
    }

    /// Vendor name reported by the plugin at registration
    pub fn provider(&self) -> &str {
        self.options
            .get(OPTION_PROVIDER)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Registered,
    Deregistered,
}

#[derive(Debug, Clone)]
pub struct PluginUpdateEvent {
    pub event_type: EventType,
    pub info: Arc<PluginInfo>,
}

/// Update stream for a single plugin type
#[derive(Debug)]
pub struct PluginUpdateSubscription {
    plugin_type: String,
    receiver: broadcast::Receiver<PluginUpdateEvent>,
}

impl PluginUpdateSubscription {
    pub fn new(plugin_type: impl Into<String>, receiver: broadcast::Receiver<PluginUpdateEvent>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            receiver,
        }
    }

    /// Next event of the subscribed type.
    ///
    /// `Lagged` means events were dropped and the consumer should resync.
    pub async fn recv(&mut self) -> std::result::Result<PluginUpdateEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.info.plugin_type == self.plugin_type {
                return Ok(event);
            }
        }
    }
}

#[async_trait]
pub trait DynamicRegistry: Send + Sync + Debug {
    async fn register_plugin(&self, info: PluginInfo) -> Result<()>;

    /// Removes the entry only if it is still backed by `alloc_id`
    async fn deregister_plugin(&self, plugin_type: &str, name: &str, alloc_id: &str) -> Result<()>;

    async fn plugin_for_allocation(
        &self,
        plugin_type: &str,
        name: &str,
        alloc_id: &str,
    ) -> Result<Option<Arc<PluginInfo>>>;

    async fn list_plugins(&self, plugin_type: &str) -> Vec<Arc<PluginInfo>>;

    /// Resolves once the plugin is registered; callers bound the wait
    async fn wait_for_plugin(&self, plugin_type: &str, name: &str) -> Result<Arc<PluginInfo>>;

    fn subscribe_to_updates(&self, plugin_type: &str) -> PluginUpdateSubscription;
}
