//! Supervision of a single plugin instance.
//!
//! An [`InstanceManager`] owns the client for one registered plugin and
//! fingerprints it on a fixed interval, forwarding every snapshot to the
//! updater callback. Shutdown closes the client, runs one last bounded
//! fingerprint so the final report is unhealthy, and only then completes.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fingerprint::Fingerprinter;
use super::UpdateIngressInfoFn;
use crate::config::ManagerConfig;
use crate::dynamicplugins::PluginInfo;
use crate::plugins::{IngressPlugin, PluginClientFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

type Completion = Shared<BoxFuture<'static, ()>>;

pub struct InstanceManager {
    id: Uuid,
    info: Arc<PluginInfo>,
    config: ManagerConfig,
    factory: Arc<dyn PluginClientFactory>,
    updater: UpdateIngressInfoFn,
    state: Mutex<InstanceState>,
    /// Moved into the loop task by `run`
    fingerprinter: Mutex<Option<Fingerprinter>>,
    ready: watch::Receiver<bool>,
    shutdown_token: CancellationToken,
    completion: Mutex<Option<Completion>>,
}

impl fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceManager")
            .field("id", &self.id)
            .field("plugin_name", &self.info.name)
            .field("alloc_id", &self.info.alloc_id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl InstanceManager {
    pub fn new(
        info: Arc<PluginInfo>,
        config: ManagerConfig,
        factory: Arc<dyn PluginClientFactory>,
        updater: UpdateIngressInfoFn,
    ) -> Self {
        let fingerprinter = Fingerprinter::new(info.clone());
        let ready = fingerprinter.ready_signal();
        Self {
            id: Uuid::new_v4(),
            info,
            config,
            factory,
            updater,
            state: Mutex::new(InstanceState::Created),
            fingerprinter: Mutex::new(Some(fingerprinter)),
            ready,
            shutdown_token: CancellationToken::new(),
            completion: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn info(&self) -> &Arc<PluginInfo> {
        &self.info
    }

    /// Allocation currently backing this instance
    pub fn alloc_id(&self) -> &str {
        &self.info.alloc_id
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock()
    }

    /// Create the client and start the fingerprint loop. Only the first call
    /// has an effect.
    pub fn run(&self) {
        let Some(mut fingerprinter) = self.fingerprinter.lock().take() else {
            debug!(instance_id = %self.id, "Instance manager already started");
            return;
        };
        {
            let mut state = self.state.lock();
            if *state != InstanceState::Created {
                return;
            }
            *state = InstanceState::Running;
        }

        let client = self.factory.new_client(self.info.socket_path());
        fingerprinter.set_client(client.clone());

        let supervisor = FingerprintLoop {
            id: self.id,
            plugin_name: self.info.name.clone(),
            fingerprinter,
            client,
            updater: self.updater.clone(),
            interval: self.config.fingerprint_interval(),
            final_timeout: self.config.shutdown_fingerprint_timeout(),
            token: self.shutdown_token.clone(),
        };

        let handle = tokio::spawn(supervisor.run());
        let completion = handle.map(|_| ()).boxed().shared();
        *self.completion.lock() = Some(completion);

        info!(
            instance_id = %self.id,
            plugin_name = %self.info.name,
            alloc_id = %self.info.alloc_id,
            socket_path = %self.info.socket_path(),
            "🔍 INSTANCE: Started plugin fingerprinting"
        );
    }

    /// Resolves once the first fingerprint has succeeded, or `false` if the
    /// instance stopped before that happened.
    pub async fn wait_until_ready(&self) -> bool {
        let mut ready = self.ready.clone();
        let became_ready = ready.wait_for(|r| *r).await.is_ok();
        became_ready
    }

    /// Stop the loop and wait for its final report.
    ///
    /// Safe to call more than once and on an instance that never ran; every
    /// caller returns only after the loop has exited.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == InstanceState::Running {
                *state = InstanceState::ShuttingDown;
            }
        }
        self.shutdown_token.cancel();
        // Never ran: drop the latch so readiness waiters resolve
        drop(self.fingerprinter.lock().take());

        let completion = self.completion.lock().clone();
        if let Some(completion) = completion {
            completion.await;
        }

        *self.state.lock() = InstanceState::Stopped;
        debug!(
            instance_id = %self.id,
            plugin_name = %self.info.name,
            alloc_id = %self.info.alloc_id,
            "Instance manager stopped"
        );
    }
}

struct FingerprintLoop {
    id: Uuid,
    plugin_name: String,
    fingerprinter: Fingerprinter,
    client: Arc<dyn IngressPlugin>,
    updater: UpdateIngressInfoFn,
    interval: Duration,
    final_timeout: Duration,
    token: CancellationToken,
}

impl FingerprintLoop {
    async fn run(mut self) {
        let mut next = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = sleep_until(next) => {
                    let snapshot = tokio::select! {
                        biased;
                        _ = self.token.cancelled() => break,
                        snapshot = self.fingerprinter.fingerprint(self.interval) => snapshot,
                    };
                    if let Some(snapshot) = snapshot {
                        (self.updater)(&self.plugin_name, snapshot);
                    }
                    next = Instant::now() + self.interval;
                }
            }
        }

        if let Err(e) = self.client.close().await {
            warn!(instance_id = %self.id, plugin_name = %self.plugin_name, error = %e, "Failed to close plugin client");
        }

        // The client is closed, so this resolves quickly from the cached identity
        if let Some(mut snapshot) = self.fingerprinter.fingerprint(self.final_timeout).await {
            if snapshot.healthy {
                snapshot.set_unhealthy("plugin instance shut down");
            }
            (self.updater)(&self.plugin_name, snapshot);
        }
        debug!(instance_id = %self.id, plugin_name = %self.plugin_name, "Fingerprint loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamicplugins::PluginConnectionInfo;
    use crate::plugins::{PluginError, PluginInfoResponse, PluginResult};
    use crate::structs::HealthSnapshot;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct AlwaysHealthy {
        closed: AtomicBool,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl IngressPlugin for AlwaysHealthy {
        async fn probe(&self, _timeout: Duration) -> PluginResult<bool> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.closed.load(Ordering::SeqCst) {
                Err(PluginError::Closed)
            } else {
                Ok(true)
            }
        }

        async fn info(&self, _timeout: Duration) -> PluginResult<PluginInfoResponse> {
            Err(PluginError::Closed)
        }

        async fn create_routes(&self, _alloc_id: &str, _timeout: Duration) -> PluginResult<()> {
            Ok(())
        }

        async fn change_or_delete_routes(
            &self,
            _alloc_id: &str,
            _timeout: Duration,
        ) -> PluginResult<()> {
            Ok(())
        }

        async fn close(&self) -> PluginResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Factory {
        client: Arc<AlwaysHealthy>,
    }

    impl PluginClientFactory for Factory {
        fn new_client(&self, _address: &str) -> Arc<dyn IngressPlugin> {
            self.client.clone()
        }
    }

    fn recorder() -> (UpdateIngressInfoFn, Arc<Mutex<Vec<(String, HealthSnapshot)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let updater: UpdateIngressInfoFn = Arc::new(move |name: &str, snapshot: HealthSnapshot| {
            sink.lock().push((name.to_string(), snapshot));
        });
        (updater, seen)
    }

    fn plugin_info() -> Arc<PluginInfo> {
        Arc::new(PluginInfo {
            plugin_type: "ingress".to_string(),
            name: "lb".to_string(),
            version: "1.0.0".to_string(),
            connection_info: Some(PluginConnectionInfo {
                socket_path: "/tmp/lb.sock".to_string(),
            }),
            alloc_id: "alloc-1".to_string(),
            options: HashMap::new(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fingerprints_on_interval_and_reports_final_unhealthy() {
        let factory = Arc::new(Factory::default());
        let (updater, seen) = recorder();
        let manager = InstanceManager::new(
            plugin_info(),
            ManagerConfig::default(),
            factory.clone(),
            updater,
        );

        manager.run();
        assert_eq!(manager.state(), InstanceState::Running);
        assert!(manager.wait_until_ready().await);

        // 0s, 3s, 6s
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(factory.client.probes.load(Ordering::SeqCst), 3);

        manager.shutdown().await;
        assert_eq!(manager.state(), InstanceState::Stopped);

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert!(seen[..3].iter().all(|(name, s)| name == "lb" && s.healthy));
        let (_, last) = seen.last().unwrap();
        assert!(!last.healthy);
        assert!(!last.health_description.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let (updater, seen) = recorder();
        let manager = InstanceManager::new(
            plugin_info(),
            ManagerConfig::default(),
            Arc::new(Factory::default()),
            updater,
        );
        manager.run();
        manager.run();

        manager.shutdown().await;
        manager.shutdown().await;

        let unhealthy = seen.lock().iter().filter(|(_, s)| !s.healthy).count();
        assert_eq!(unhealthy, 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_run_returns_immediately() {
        let (updater, seen) = recorder();
        let manager = InstanceManager::new(
            plugin_info(),
            ManagerConfig::default(),
            Arc::new(Factory::default()),
            updater,
        );
        manager.shutdown().await;
        assert_eq!(manager.state(), InstanceState::Stopped);
        assert!(seen.lock().is_empty());
        assert!(!manager.wait_until_ready().await);
    }
}
