//! In-memory dynamic plugin registry.
//!
//! Entries live in a `parking_lot::RwLock` (never held across an await) and
//! every change is published on a broadcast channel after the lock is
//! released.
//!
//! ```rust
//! use ingress_supervisor::dynamicplugins::{
//!     DynamicRegistry, InMemoryRegistry, PluginConnectionInfo, PluginInfo,
//! };
//! use std::collections::HashMap;
//!
//! # tokio_test::block_on(async {
//! let registry = InMemoryRegistry::new();
//! registry
//!     .register_plugin(PluginInfo {
//!         plugin_type: "ingress".to_string(),
//!         name: "edge-lb".to_string(),
//!         version: "1.25.0".to_string(),
//!         connection_info: Some(PluginConnectionInfo {
//!             socket_path: "/var/lib/client/ingress/plugins/a1/ingress.sock".to_string(),
//!         }),
//!         alloc_id: "a1".to_string(),
//!         options: HashMap::new(),
//!     })
//!     .await
//!     .unwrap();
//!
//! // a stale allocation cannot withdraw the current registration
//! registry.deregister_plugin("ingress", "edge-lb", "a0").await.unwrap();
//! assert_eq!(registry.list_plugins("ingress").await.len(), 1);
//! # });
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{DynamicRegistry, EventType, PluginInfo, PluginUpdateEvent, PluginUpdateSubscription};
use crate::error::{IngressError, Result};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// plugin type -> plugin name -> info
type PluginTable = HashMap<String, HashMap<String, Arc<PluginInfo>>>;

#[derive(Debug)]
pub struct InMemoryRegistry {
    plugins: RwLock<PluginTable>,
    updates: broadcast::Sender<PluginUpdateEvent>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            plugins: RwLock::new(HashMap::new()),
            updates,
        }
    }

    fn publish(&self, event_type: EventType, info: Arc<PluginInfo>) {
        // No subscribers is not an error
        let _ = self.updates.send(PluginUpdateEvent { event_type, info });
    }

    fn lookup(&self, plugin_type: &str, name: &str) -> Option<Arc<PluginInfo>> {
        self.plugins
            .read()
            .get(plugin_type)
            .and_then(|by_name| by_name.get(name))
            .cloned()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(info: &PluginInfo) -> Result<()> {
    if info.plugin_type.is_empty() {
        return Err(IngressError::Validation("plugin type is required".to_string()));
    }
    if info.name.is_empty() {
        return Err(IngressError::Validation("plugin name is required".to_string()));
    }
    if info.alloc_id.is_empty() {
        return Err(IngressError::Validation(format!(
            "plugin '{}' has no allocation id",
            info.name
        )));
    }
    Ok(())
}

#[async_trait]
impl DynamicRegistry for InMemoryRegistry {
    async fn register_plugin(&self, info: PluginInfo) -> Result<()> {
        validate(&info)?;
        let info = Arc::new(info);

        let replaced = {
            let mut plugins = self.plugins.write();
            plugins
                .entry(info.plugin_type.clone())
                .or_default()
                .insert(info.name.clone(), info.clone())
        };

        info!(
            plugin_type = %info.plugin_type,
            plugin_name = %info.name,
            alloc_id = %info.alloc_id,
            replaced_alloc = replaced.as_ref().map(|p| p.alloc_id.as_str()),
            "📚 REGISTRY: Registered plugin"
        );
        self.publish(EventType::Registered, info);
        Ok(())
    }

    async fn deregister_plugin(&self, plugin_type: &str, name: &str, alloc_id: &str) -> Result<()> {
        let removed = {
            let mut plugins = self.plugins.write();
            match plugins.get_mut(plugin_type) {
                Some(by_name) if by_name.get(name).is_some_and(|p| p.alloc_id == alloc_id) => {
                    by_name.remove(name)
                }
                _ => None,
            }
        };

        match removed {
            Some(info) => {
                info!(
                    plugin_type = %plugin_type,
                    plugin_name = %name,
                    alloc_id = %alloc_id,
                    "📚 REGISTRY: Deregistered plugin"
                );
                self.publish(EventType::Deregistered, info);
            }
            None => {
                debug!(
                    plugin_type = %plugin_type,
                    plugin_name = %name,
                    alloc_id = %alloc_id,
                    "Deregistration skipped, plugin absent or owned by another allocation"
                );
            }
        }
        Ok(())
    }

    async fn plugin_for_allocation(
        &self,
        plugin_type: &str,
        name: &str,
        alloc_id: &str,
    ) -> Result<Option<Arc<PluginInfo>>> {
        Ok(self
            .lookup(plugin_type, name)
            .filter(|p| p.alloc_id == alloc_id))
    }

    async fn list_plugins(&self, plugin_type: &str) -> Vec<Arc<PluginInfo>> {
        let plugins = self.plugins.read();
        let mut listed: Vec<_> = plugins
            .get(plugin_type)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        listed
    }

    async fn wait_for_plugin(&self, plugin_type: &str, name: &str) -> Result<Arc<PluginInfo>> {
        // Subscribe before checking so a registration in between is not lost
        let mut updates = self.subscribe_to_updates(plugin_type);
        if let Some(info) = self.lookup(plugin_type, name) {
            return Ok(info);
        }

        loop {
            match updates.recv().await {
                Ok(event) if event.event_type == EventType::Registered && event.info.name == name => {
                    return Ok(event.info);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Some(info) = self.lookup(plugin_type, name) {
                        return Ok(info);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(IngressError::registry(
                        "wait_for_plugin",
                        "registry update stream closed",
                    ));
                }
            }
        }
    }

    fn subscribe_to_updates(&self, plugin_type: &str) -> PluginUpdateSubscription {
        PluginUpdateSubscription::new(plugin_type, self.updates.subscribe())
    }
}
