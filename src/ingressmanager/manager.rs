//! Set manager reconciling instance managers against the dynamic registry.
//!
//! The instance table (`type -> name -> InstanceManager`) sits behind a single
//! async `RwLock`. Two paths feed the same mutation logic:
//!
//! - a full resync on a fixed period (immediately on start, then every
//!   `plugin_resync_period_ms`), which converges the table to the registry
//!   listing regardless of missed events;
//! - the registry update stream, where a registration ensures an instance and
//!   a deregistration removes one only when its allocation still backs it.
//!
//! Replacing the allocation behind a key shuts the old instance down fully
//! before the new one starts, all while the table lock is held, so two
//! supervisors never run for the same plugin.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::instance::InstanceManager;
use super::{PluginManager, TriggerNodeEventFn, UpdateIngressInfoFn};
use crate::config::ManagerConfig;
use crate::dynamicplugins::{
    DynamicRegistry, EventType, PluginInfo, PluginUpdateEvent, PluginUpdateSubscription,
};
use crate::error::{IngressError, Result};
use crate::logging::log_plugin_operation;
use crate::plugins::PluginClientFactory;
use crate::structs::NodeEvent;

/// plugin type -> plugin name -> instance
type InstanceTable = HashMap<String, HashMap<String, Arc<InstanceManager>>>;

pub struct IngressManager {
    inner: Arc<ManagerInner>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner {
    config: ManagerConfig,
    registry: Arc<dyn DynamicRegistry>,
    factory: Arc<dyn PluginClientFactory>,
    updater: UpdateIngressInfoFn,
    node_events: Option<TriggerNodeEventFn>,
    instances: RwLock<InstanceTable>,
    shutdown_token: CancellationToken,
}

impl fmt::Debug for IngressManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngressManager")
            .field("plugin_type", &self.inner.config.plugin_type)
            .field("resync_period", &self.inner.config.resync_period())
            .field("shutdown", &self.inner.shutdown_token.is_cancelled())
            .finish()
    }
}

impl IngressManager {
    pub fn new(
        config: ManagerConfig,
        registry: Arc<dyn DynamicRegistry>,
        factory: Arc<dyn PluginClientFactory>,
        updater: UpdateIngressInfoFn,
        node_events: Option<TriggerNodeEventFn>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                registry,
                factory,
                updater,
                node_events,
                instances: RwLock::new(HashMap::new()),
                shutdown_token: CancellationToken::new(),
            }),
            run_handle: Mutex::new(None),
        }
    }

    /// Block until the registry reports the plugin, then make sure it is
    /// supervised. Bounded by `wait_for_plugin_timeout_ms`.
    pub async fn wait_for_plugin(&self, plugin_type: &str, name: &str) -> Result<()> {
        let bound = self.inner.config.wait_for_plugin_timeout();
        let not_ready = |message: String| IngressError::PluginNotReady {
            plugin_type: plugin_type.to_string(),
            plugin_id: name.to_string(),
            message,
        };

        let info = match tokio::time::timeout(
            bound,
            self.inner.registry.wait_for_plugin(plugin_type, name),
        )
        .await
        {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => return Err(not_ready(e.to_string())),
            Err(_) => return Err(not_ready(format!("timed out after {bound:?}"))),
        };

        let mut table = self.inner.instances.write().await;
        if self.inner.shutdown_token.is_cancelled() {
            return Err(IngressError::InvalidState(
                "ingress manager is shutting down".to_string(),
            ));
        }
        self.inner.ensure_instance(&mut table, info).await;
        Ok(())
    }

    /// Resolves once every currently tracked instance has completed its
    /// first successful fingerprint.
    pub async fn wait_for_first_fingerprint(&self, bound: Duration) -> Result<()> {
        let instances: Vec<Arc<InstanceManager>> = {
            let table = self.inner.instances.read().await;
            table
                .values()
                .flat_map(|by_name| by_name.values().cloned())
                .collect()
        };

        let all_ready = join_all(instances.iter().map(|i| i.wait_until_ready()));
        match tokio::time::timeout(bound, all_ready).await {
            Ok(results) if results.iter().all(|ready| *ready) => Ok(()),
            Ok(_) => Err(IngressError::InvalidState(
                "plugin instance stopped before its first fingerprint".to_string(),
            )),
            Err(_) => Err(IngressError::Timeout {
                operation: "waiting for first fingerprint".to_string(),
                timeout_ms: bound.as_millis() as u64,
            }),
        }
    }

    /// Plugin name -> backing allocation for every tracked instance of a type
    pub async fn tracked_allocations(&self, plugin_type: &str) -> BTreeMap<String, String> {
        let table = self.inner.instances.read().await;
        table
            .get(plugin_type)
            .map(|by_name| {
                by_name
                    .iter()
                    .map(|(name, mgr)| (name.clone(), mgr.alloc_id().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn instance(&self, plugin_type: &str, name: &str) -> Option<Arc<InstanceManager>> {
        let table = self.inner.instances.read().await;
        table
            .get(plugin_type)
            .and_then(|by_name| by_name.get(name))
            .cloned()
    }

    /// Run one full resync pass outside the background loop
    pub async fn resync(&self) {
        self.inner.resync_plugins_from_registry().await;
    }
}

#[async_trait]
impl PluginManager for IngressManager {
    fn plugin_type(&self) -> &str {
        &self.inner.config.plugin_type
    }

    fn run(&self) {
        let mut handle = self.run_handle.lock();
        if handle.is_some() || self.inner.shutdown_token.is_cancelled() {
            return;
        }

        // Subscribe before spawning so no update is missed between the two
        let updates = self
            .inner
            .registry
            .subscribe_to_updates(&self.inner.config.plugin_type);
        *handle = Some(tokio::spawn(run_loop(self.inner.clone(), updates)));

        info!(
            plugin_type = %self.inner.config.plugin_type,
            resync_period_ms = self.inner.config.resync_period().as_millis() as u64,
            "🚀 INGRESS_MANAGER: Started plugin reconciliation"
        );
    }

    async fn shutdown(&self) {
        self.inner.shutdown_token.cancel();

        // The loop must be gone before instances are torn down, or a resync
        // could start new ones behind our back
        let handle = self.run_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Ingress manager loop ended abnormally");
            }
        }

        let drained: Vec<Arc<InstanceManager>> = {
            let mut table = self.inner.instances.write().await;
            table
                .drain()
                .flat_map(|(_, by_name)| by_name.into_values())
                .collect()
        };
        let count = drained.len();
        join_all(drained.iter().map(|mgr| mgr.shutdown())).await;

        info!(
            plugin_type = %self.inner.config.plugin_type,
            instances = count,
            "🛑 INGRESS_MANAGER: Shutdown complete"
        );
    }
}

async fn run_loop(inner: Arc<ManagerInner>, mut updates: PluginUpdateSubscription) {
    let mut updates_open = true;
    let mut next_resync = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown_token.cancelled() => break,
            _ = sleep_until(next_resync) => {
                inner.resync_plugins_from_registry().await;
                next_resync = Instant::now() + inner.config.resync_period();
            }
            event = updates.recv(), if updates_open => match event {
                Ok(event) => inner.handle_plugin_event(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed = missed, "Registry updates lagged, resyncing");
                    next_resync = Instant::now();
                }
                Err(RecvError::Closed) => {
                    warn!("Registry update stream closed, relying on periodic resync");
                    updates_open = false;
                }
            },
        }
    }
    debug!(plugin_type = %inner.config.plugin_type, "Ingress manager loop exited");
}

impl ManagerInner {
    async fn resync_plugins_from_registry(&self) {
        let plugin_type = self.config.plugin_type.as_str();
        let mut table = self.instances.write().await;
        if self.shutdown_token.is_cancelled() {
            return;
        }

        let plugins = self.registry.list_plugins(plugin_type).await;
        let seen: HashSet<String> = plugins.iter().map(|p| p.name.clone()).collect();
        trace!(plugin_type = %plugin_type, listed = plugins.len(), "Resyncing plugins from registry");

        for plugin in plugins {
            self.ensure_instance(&mut table, plugin).await;
        }

        let stale: Vec<Arc<PluginInfo>> = table
            .get(plugin_type)
            .map(|by_name| {
                by_name
                    .values()
                    .filter(|mgr| !seen.contains(&mgr.info().name))
                    .map(|mgr| mgr.info().clone())
                    .collect()
            })
            .unwrap_or_default();
        for info in stale {
            self.ensure_no_instance(&mut table, &info).await;
        }
    }

    async fn handle_plugin_event(&self, event: PluginUpdateEvent) {
        trace!(
            event = ?event.event_type,
            plugin_name = %event.info.name,
            alloc_id = %event.info.alloc_id,
            "Dynamic plugin event"
        );

        let mut table = self.instances.write().await;
        if self.shutdown_token.is_cancelled() {
            return;
        }
        match event.event_type {
            EventType::Registered => {
                if self.is_superseded(&event.info).await {
                    debug!(
                        plugin_name = %event.info.name,
                        alloc_id = %event.info.alloc_id,
                        "Ignoring registration for superseded allocation"
                    );
                    return;
                }
                self.ensure_instance(&mut table, event.info).await;
            }
            EventType::Deregistered => {
                self.ensure_no_instance(&mut table, &event.info).await;
            }
        }
    }

    /// Whether the registry no longer lists `info`'s allocation for its key.
    /// Queued events can trail a resync that already installed a newer one.
    async fn is_superseded(&self, info: &PluginInfo) -> bool {
        match self
            .registry
            .plugin_for_allocation(&info.plugin_type, &info.name, &info.alloc_id)
            .await
        {
            Ok(current) => current.is_none(),
            Err(e) => {
                warn!(
                    plugin_name = %info.name,
                    alloc_id = %info.alloc_id,
                    error = %e,
                    "Registry lookup failed, leaving convergence to resync"
                );
                true
            }
        }
    }

    /// Start an instance for `info` unless one already runs for its
    /// allocation. A different allocation replaces the running instance.
    async fn ensure_instance(&self, table: &mut InstanceTable, info: Arc<PluginInfo>) {
        let by_name = table.entry(info.plugin_type.clone()).or_default();
        let existing = by_name.get(&info.name).cloned();

        match existing {
            Some(existing) if existing.alloc_id() == info.alloc_id => {}
            Some(existing) => {
                existing.shutdown().await;
                log_plugin_operation(
                    "replace_instance",
                    &info.plugin_type,
                    &info.name,
                    Some(&info.alloc_id),
                    "replaced",
                    Some(existing.alloc_id()),
                );
                self.emit(
                    NodeEvent::ingress("Plugin instance replaced by new allocation")
                        .add_detail("plugin", info.name.clone())
                        .add_detail("previous_alloc_id", existing.alloc_id())
                        .add_detail("alloc_id", info.alloc_id.clone()),
                );
                let mgr = self.start_instance(info);
                by_name.insert(mgr.info().name.clone(), mgr);
            }
            None => {
                debug!(
                    plugin_name = %info.name,
                    plugin_type = %info.plugin_type,
                    alloc_id = %info.alloc_id,
                    "Detected new ingress plugin"
                );
                let mgr = self.start_instance(info);
                by_name.insert(mgr.info().name.clone(), mgr);
            }
        }
    }

    /// Remove the instance for `info` if, and only if, `info`'s allocation
    /// still backs it
    async fn ensure_no_instance(&self, table: &mut InstanceTable, info: &PluginInfo) -> bool {
        let Some(by_name) = table.get_mut(&info.plugin_type) else {
            return false;
        };
        let Some(existing) = by_name.get(&info.name).cloned() else {
            return false;
        };
        if existing.alloc_id() != info.alloc_id {
            debug!(
                plugin_name = %info.name,
                alloc_id = %info.alloc_id,
                tracked_alloc_id = %existing.alloc_id(),
                "Ignoring removal for superseded allocation"
            );
            return false;
        }

        existing.shutdown().await;
        by_name.remove(&info.name);
        log_plugin_operation(
            "stop_instance",
            &info.plugin_type,
            &info.name,
            Some(&info.alloc_id),
            "removed",
            None,
        );
        self.emit(
            NodeEvent::ingress("Plugin instance removed")
                .add_detail("plugin", info.name.clone())
                .add_detail("alloc_id", info.alloc_id.clone()),
        );
        true
    }

    fn start_instance(&self, info: Arc<PluginInfo>) -> Arc<InstanceManager> {
        let mgr = Arc::new(InstanceManager::new(
            info,
            self.config.clone(),
            self.factory.clone(),
            self.updater.clone(),
        ));
        mgr.run();
        mgr
    }

    fn emit(&self, event: NodeEvent) {
        if let Some(node_events) = &self.node_events {
            node_events(event);
        }
    }
}
