//! In-process fakes for plugins, task runner collaborators and cluster state
//! callbacks.

use async_trait::async_trait;
use ingress_supervisor::dynamicplugins::{PluginConnectionInfo, PluginInfo};
use ingress_supervisor::ingressmanager::{TriggerNodeEventFn, UpdateIngressInfoFn};
use ingress_supervisor::plugins::{
    IngressPlugin, PluginClientFactory, PluginError, PluginHandler, PluginInfoResponse,
    PluginResult,
};
use ingress_supervisor::structs::{HealthSnapshot, NodeEvent, TaskEvent, TaskEventType};
use ingress_supervisor::taskrunner::{EventEmitter, TaskLifecycle};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn plugin_info(name: &str, alloc_id: &str) -> PluginInfo {
    PluginInfo {
        plugin_type: "ingress".to_string(),
        name: name.to_string(),
        version: "1.25.0".to_string(),
        connection_info: Some(PluginConnectionInfo {
            socket_path: format!("/var/lib/client/ingress/plugins/{alloc_id}/ingress.sock"),
        }),
        alloc_id: alloc_id.to_string(),
        options: HashMap::from([("Provider".to_string(), "nginx".to_string())]),
    }
}

/// Plugin whose probe results are scripted; once the script runs out the
/// fallback result repeats. Probes fail after `close`.
#[derive(Debug)]
pub struct MockPlugin {
    script: Mutex<VecDeque<PluginResult<bool>>>,
    fallback: Mutex<PluginResult<bool>>,
    closed: AtomicBool,
    pub probes: AtomicUsize,
    on_close: Option<Arc<AtomicUsize>>,
}

impl MockPlugin {
    pub fn healthy() -> Arc<Self> {
        Self::scripted(vec![], Ok(true))
    }

    pub fn scripted(script: Vec<PluginResult<bool>>, fallback: PluginResult<bool>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            closed: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            on_close: None,
        })
    }

    pub fn set_fallback(&self, result: PluginResult<bool>) {
        *self.fallback.lock() = result;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IngressPlugin for MockPlugin {
    async fn probe(&self, _timeout: Duration) -> PluginResult<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(PluginError::Closed);
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().clone())
    }

    async fn info(&self, _timeout: Duration) -> PluginResult<PluginInfoResponse> {
        Ok(PluginInfoResponse {
            name: "nginx".to_string(),
            plugin_version: "1.25.0".to_string(),
            api_versions: vec!["v1".to_string()],
        })
    }

    async fn create_routes(&self, _alloc_id: &str, _timeout: Duration) -> PluginResult<()> {
        Ok(())
    }

    async fn change_or_delete_routes(&self, _alloc_id: &str, _timeout: Duration) -> PluginResult<()> {
        Ok(())
    }

    async fn close(&self) -> PluginResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(live) = &self.on_close {
                live.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

/// Hands out a fresh healthy [`MockPlugin`] per client and tracks how many
/// clients are open at once
#[derive(Debug, Default)]
pub struct CountingFactory {
    pub live: Arc<AtomicUsize>,
    pub max_live: AtomicUsize,
    pub created: AtomicUsize,
    pub addresses: Mutex<Vec<String>>,
}

impl CountingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PluginClientFactory for CountingFactory {
    fn new_client(&self, address: &str) -> Arc<dyn IngressPlugin> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        self.addresses.lock().push(address.to_string());
        Arc::new(MockPlugin {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(true)),
            closed: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            on_close: Some(self.live.clone()),
        })
    }
}

/// Always returns the same plugin
#[derive(Debug)]
pub struct FixedFactory(pub Arc<MockPlugin>);

impl PluginClientFactory for FixedFactory {
    fn new_client(&self, _address: &str) -> Arc<dyn IngressPlugin> {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct RecordingUpdater {
    pub snapshots: Mutex<Vec<(String, HealthSnapshot)>>,
}

impl RecordingUpdater {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callback(self: &Arc<Self>) -> UpdateIngressInfoFn {
        let sink = self.clone();
        Arc::new(move |name: &str, snapshot: HealthSnapshot| {
            sink.snapshots.lock().push((name.to_string(), snapshot));
        })
    }

    pub fn for_plugin(&self, name: &str) -> Vec<HealthSnapshot> {
        self.snapshots
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[derive(Default)]
pub struct RecordingNodeEvents {
    pub events: Mutex<Vec<NodeEvent>>,
}

impl RecordingNodeEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callback(self: &Arc<Self>) -> TriggerNodeEventFn {
        let sink = self.clone();
        Arc::new(move |event: NodeEvent| sink.events.lock().push(event))
    }
}

/// Task runner side: records emitted task events and kill requests
#[derive(Default)]
pub struct RecordingTask {
    pub events: Mutex<Vec<TaskEvent>>,
    pub kills: Mutex<Vec<TaskEvent>>,
}

impl RecordingTask {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, event_type: TaskEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventEmitter for RecordingTask {
    fn emit_event(&self, event: TaskEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl TaskLifecycle for RecordingTask {
    async fn kill(&self, event: TaskEvent) -> ingress_supervisor::Result<()> {
        self.kills.lock().push(event);
        Ok(())
    }
}

/// Plugin process fake served over a real socket; its first
/// `failing_probes` probes report an error
#[derive(Debug)]
pub struct FlakyHandler {
    failing_probes: usize,
    pub probes: AtomicUsize,
}

impl FlakyHandler {
    pub fn new(failing_probes: usize) -> Arc<Self> {
        Arc::new(Self {
            failing_probes,
            probes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PluginHandler for FlakyHandler {
    async fn probe(&self) -> Result<bool, String> {
        let attempt = self.probes.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_probes {
            Err("load balancer not ready".to_string())
        } else {
            Ok(true)
        }
    }

    async fn info(&self) -> Result<PluginInfoResponse, String> {
        Ok(PluginInfoResponse {
            name: "haproxy".to_string(),
            plugin_version: "2.8.3".to_string(),
            api_versions: vec!["v1".to_string()],
        })
    }

    async fn create_routes(&self, _alloc_id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn change_or_delete_routes(&self, _alloc_id: &str) -> Result<(), String> {
        Ok(())
    }
}
