//! # Ingress Plugin Supervisor Hook
//!
//! Supervises a plugin that runs as a task. Prestart prepares the socket
//! directory and points the workload at it; poststart launches a supervisor
//! loop that:
//!
//! 1. probes every `startup_retry_interval` until the plugin is healthy, and
//!    kills the task if that takes longer than `startup_timeout`;
//! 2. registers the plugin in the dynamic registry (failure also kills);
//! 3. probes every `monitor_interval`, emitting task events only when health
//!    changes, until stop cancels it and the registration is withdrawn.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::interfaces::{
    EventEmitter, HookResources, MountConfig, TaskHook, TaskLifecycle, TaskPrestartRequest,
    TaskPrestartResponse,
};
use crate::config::SupervisorConfig;
use crate::constants::{
    INGRESS_ENDPOINT_ENV, INGRESS_PLUGIN_TYPE, INGRESS_SOCKET_NAME, OPTION_LB_CONF_PATH,
    OPTION_PROVIDER,
};
use crate::dynamicplugins::{DynamicRegistry, PluginConnectionInfo, PluginInfo};
use crate::error::{IngressError, Result};
use crate::logging::{log_error, log_plugin_operation};
use crate::plugins::{IngressPlugin, PluginClientFactory, PluginError};
use crate::structs::{Task, TaskEvent, TaskEventType, TaskIngressPluginConfig};

const HOOK_NAME: &str = "ingress_plugin_supervisor";

/// Everything the hook needs from its task runner
pub struct IngressPluginSupervisorHookConfig {
    pub alloc_id: String,
    pub task: Task,
    /// Root under which per-allocation socket directories are created
    pub client_state_dir: PathBuf,
    pub supervisor: SupervisorConfig,
    pub registry: Arc<dyn DynamicRegistry>,
    pub factory: Arc<dyn PluginClientFactory>,
    pub events: Arc<dyn EventEmitter>,
    pub lifecycle: Arc<dyn TaskLifecycle>,
    pub resources: Arc<HookResources>,
}

pub struct IngressPluginSupervisorHook {
    alloc_id: String,
    task: Task,
    plugin: TaskIngressPluginConfig,
    socket_mount_point: PathBuf,
    socket_path: Mutex<Option<String>>,
    config: SupervisorConfig,
    registry: Arc<dyn DynamicRegistry>,
    factory: Arc<dyn PluginClientFactory>,
    events: Arc<dyn EventEmitter>,
    lifecycle: Arc<dyn TaskLifecycle>,
    resources: Arc<HookResources>,
    shutdown_token: CancellationToken,
    started: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IngressPluginSupervisorHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressPluginSupervisorHook")
            .field("alloc_id", &self.alloc_id)
            .field("plugin_id", &self.plugin.id)
            .field("socket_mount_point", &self.socket_mount_point)
            .field("started", &self.started.load(Ordering::Acquire))
            .finish()
    }
}

impl IngressPluginSupervisorHook {
    pub fn new(config: IngressPluginSupervisorHookConfig) -> Result<Self> {
        let plugin = config.task.ingress_plugin_config.clone().ok_or_else(|| {
            IngressError::Validation(format!(
                "task '{}' is not an ingress plugin",
                config.task.name
            ))
        })?;
        if plugin.id.is_empty() {
            return Err(IngressError::Validation(format!(
                "task '{}' has an ingress plugin config without an id",
                config.task.name
            )));
        }

        // Derived from the allocation alone so restarts reuse the same path
        let socket_mount_point = socket_mount_point(&config.client_state_dir, &config.alloc_id);

        Ok(Self {
            alloc_id: config.alloc_id,
            task: config.task,
            plugin,
            socket_mount_point,
            socket_path: Mutex::new(None),
            config: config.supervisor,
            registry: config.registry,
            factory: config.factory,
            events: config.events,
            lifecycle: config.lifecycle,
            resources: config.resources,
            shutdown_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        })
    }

    pub fn socket_mount_point(&self) -> &Path {
        &self.socket_mount_point
    }

    /// Socket path resolved by the last prestart/poststart
    pub fn socket_path(&self) -> Option<String> {
        self.socket_path.lock().clone()
    }

    /// Prefer the path of a plugin this allocation already registered (the
    /// agent may have restarted), else the default under the mount point
    async fn resolve_socket_path(&self) -> Result<String> {
        let registered = self
            .registry
            .plugin_for_allocation(INGRESS_PLUGIN_TYPE, &self.plugin.id, &self.alloc_id)
            .await?;

        let path = match registered {
            Some(info) if !info.socket_path().is_empty() => info.socket_path().to_string(),
            _ => self
                .socket_mount_point
                .join(INGRESS_SOCKET_NAME)
                .to_string_lossy()
                .into_owned(),
        };
        *self.socket_path.lock() = Some(path.clone());
        Ok(path)
    }

    async fn create_mount_point(&self) -> Result<()> {
        let mount_error = |e: std::io::Error| IngressError::MountSetup {
            path: self.socket_mount_point.display().to_string(),
            message: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.socket_mount_point)
            .await
            .map_err(mount_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &self.socket_mount_point,
                std::fs::Permissions::from_mode(0o700),
            )
            .await
            .map_err(mount_error)?;
        }
        Ok(())
    }
}

fn socket_mount_point(client_state_dir: &Path, alloc_id: &str) -> PathBuf {
    client_state_dir.join("ingress").join("plugins").join(alloc_id)
}

#[async_trait]
impl TaskHook for IngressPluginSupervisorHook {
    fn name(&self) -> &'static str {
        HOOK_NAME
    }

    async fn prestart(&self, request: &TaskPrestartRequest) -> Result<TaskPrestartResponse> {
        self.create_mount_point().await?;
        self.resolve_socket_path().await?;

        self.resources.ensure_mountpoint_inserted(MountConfig {
            task_path: self.config.task_socket_dir.clone(),
            host_path: self.socket_mount_point.clone(),
            readonly: false,
            propagation_mode: "bidirectional".to_string(),
        });

        let mut response = TaskPrestartResponse::default();
        let defined = self.task.env.contains_key(INGRESS_ENDPOINT_ENV)
            || request.env.contains_key(INGRESS_ENDPOINT_ENV);
        if !defined {
            let in_task = self.config.task_socket_dir.join(INGRESS_SOCKET_NAME);
            response.env.insert(
                INGRESS_ENDPOINT_ENV.to_string(),
                format!("unix://{}", in_task.display()),
            );
        }

        debug!(
            alloc_id = %self.alloc_id,
            plugin_id = %self.plugin.id,
            mount_point = %self.socket_mount_point.display(),
            "Prepared ingress plugin socket mount"
        );
        Ok(response)
    }

    async fn poststart(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.shutdown_token.is_cancelled() {
            return Ok(());
        }

        let socket_path = match self.resolve_socket_path().await {
            Ok(path) => path,
            Err(e) => {
                // Nothing was launched, so a later poststart may try again
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let supervisor = SupervisorLoop {
            alloc_id: self.alloc_id.clone(),
            plugin: self.plugin.clone(),
            socket_path,
            config: self.config.clone(),
            registry: self.registry.clone(),
            factory: self.factory.clone(),
            events: self.events.clone(),
            lifecycle: self.lifecycle.clone(),
            token: self.shutdown_token.clone(),
        };
        *self.loop_handle.lock() = Some(tokio::spawn(supervisor.run()));

        info!(
            alloc_id = %self.alloc_id,
            plugin_id = %self.plugin.id,
            "🛡️ SUPERVISOR: Started ingress plugin supervisor"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.socket_mount_point).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!(
                dir = %self.socket_mount_point.display(),
                error = %e,
                "Could not remove plugin socket directory"
            ),
        }

        self.shutdown_token.cancel();

        let handle = self.loop_handle.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.stop_timeout(), &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(alloc_id = %self.alloc_id, error = %e, "Supervisor loop ended abnormally"),
                Err(_) => {
                    warn!(
                        alloc_id = %self.alloc_id,
                        timeout_ms = self.config.stop_timeout().as_millis() as u64,
                        "Supervisor loop did not exit in time, aborting"
                    );
                    handle.abort();
                }
            }
        }
        Ok(())
    }
}

enum Startup {
    Healthy,
    Cancelled,
    TimedOut(String),
}

/// Withdraws one specific registration
struct PluginRegistration {
    registry: Arc<dyn DynamicRegistry>,
    plugin_type: String,
    name: String,
    alloc_id: String,
}

impl PluginRegistration {
    async fn deregister(self) {
        match self
            .registry
            .deregister_plugin(&self.plugin_type, &self.name, &self.alloc_id)
            .await
        {
            Ok(()) => log_plugin_operation(
                "deregister",
                &self.plugin_type,
                &self.name,
                Some(&self.alloc_id),
                "deregistered",
                None,
            ),
            Err(e) => log_error(
                "supervisor_hook",
                "deregister_plugin",
                &e.to_string(),
                Some(&self.name),
            ),
        }
    }
}

struct SupervisorLoop {
    alloc_id: String,
    plugin: TaskIngressPluginConfig,
    socket_path: String,
    config: SupervisorConfig,
    registry: Arc<dyn DynamicRegistry>,
    factory: Arc<dyn PluginClientFactory>,
    events: Arc<dyn EventEmitter>,
    lifecycle: Arc<dyn TaskLifecycle>,
    token: CancellationToken,
}

impl SupervisorLoop {
    async fn run(self) {
        let client = self.factory.new_client(&self.socket_path);
        self.supervise(client.as_ref()).await;
        if let Err(e) = client.close().await {
            debug!(plugin_id = %self.plugin.id, error = %e, "Failed to close plugin client");
        }
    }

    async fn supervise(&self, client: &dyn IngressPlugin) {
        match self.wait_for_healthy(client).await {
            Startup::Healthy => {}
            Startup::Cancelled => {
                debug!(plugin_id = %self.plugin.id, "Supervisor stopped before plugin became healthy");
                return;
            }
            Startup::TimedOut(last_error) => {
                self.kill(format!("Ingress plugin failed probe: {last_error}"))
                    .await;
                return;
            }
        }

        debug!(plugin_id = %self.plugin.id, "Ingress plugin is ready");
        self.emit_healthy();

        let registration = match self.register_plugin(client).await {
            Ok(registration) => registration,
            Err(e) => {
                self.kill(format!("Ingress plugin failed to register: {e}"))
                    .await;
                return;
            }
        };

        self.monitor(client).await;
        registration.deregister().await;
    }

    async fn wait_for_healthy(&self, client: &dyn IngressPlugin) -> Startup {
        let deadline = Instant::now() + self.config.startup_timeout();
        let mut next_probe = Instant::now();
        let mut last_error = "no probe completed".to_string();

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Startup::Cancelled,
                _ = sleep_until(deadline) => return Startup::TimedOut(last_error),
                _ = sleep_until(next_probe) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match probe_once(client, self.config.probe_timeout().min(remaining)).await {
                        Ok(true) => return Startup::Healthy,
                        Ok(false) => last_error = "plugin reported unhealthy".to_string(),
                        Err(e) => last_error = e.to_string(),
                    }
                    debug!(plugin_id = %self.plugin.id, error = %last_error, "Ingress plugin not ready");
                    next_probe = Instant::now() + self.config.startup_retry_interval();
                }
            }
        }
    }

    async fn register_plugin(&self, client: &dyn IngressPlugin) -> Result<PluginRegistration> {
        let vendor = client
            .info(self.config.probe_timeout())
            .await
            .map_err(|e| IngressError::registry("register_plugin", format!("failed to probe plugin: {e}")))?;

        let mut options = HashMap::from([(OPTION_PROVIDER.to_string(), vendor.name)]);
        if let Some(path) = self.plugin.lb_conf_path() {
            options.insert(OPTION_LB_CONF_PATH.to_string(), path.to_string());
        }

        let info = PluginInfo {
            plugin_type: INGRESS_PLUGIN_TYPE.to_string(),
            name: self.plugin.id.clone(),
            version: vendor.plugin_version,
            connection_info: Some(PluginConnectionInfo {
                socket_path: self.socket_path.clone(),
            }),
            alloc_id: self.alloc_id.clone(),
            options,
        };
        self.registry.register_plugin(info).await?;

        log_plugin_operation(
            "register",
            INGRESS_PLUGIN_TYPE,
            &self.plugin.id,
            Some(&self.alloc_id),
            "registered",
            None,
        );
        Ok(PluginRegistration {
            registry: self.registry.clone(),
            plugin_type: INGRESS_PLUGIN_TYPE.to_string(),
            name: self.plugin.id.clone(),
            alloc_id: self.alloc_id.clone(),
        })
    }

    /// Probe failures here are reported, never fatal
    async fn monitor(&self, client: &dyn IngressPlugin) {
        let mut previous_healthy = true;
        let mut next_probe = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = sleep_until(next_probe) => {
                    let (healthy, failure) = match probe_once(client, self.config.probe_timeout()).await {
                        Ok(healthy) => (healthy, None),
                        Err(e) => {
                            error!(plugin_id = %self.plugin.id, error = %e, "Ingress plugin fingerprinting failed");
                            (false, Some(e))
                        }
                    };

                    if !previous_healthy && healthy {
                        self.emit_healthy();
                    }
                    if previous_healthy && !healthy {
                        let message = match &failure {
                            Some(e) => format!("Error: {e}"),
                            None => "Unknown Reason".to_string(),
                        };
                        self.events.emit_event(
                            TaskEvent::new(TaskEventType::PluginUnhealthy).set_message(message),
                        );
                    }
                    previous_healthy = healthy;
                    next_probe = Instant::now() + self.config.monitor_interval();
                }
            }
        }
    }

    fn emit_healthy(&self) {
        self.events.emit_event(
            TaskEvent::new(TaskEventType::PluginHealthy)
                .set_message(format!("plugin: {}", self.plugin.id)),
        );
    }

    async fn kill(&self, reason: String) {
        error!(
            alloc_id = %self.alloc_id,
            plugin_id = %self.plugin.id,
            error = %reason,
            "Killing task because plugin failed"
        );
        self.events.emit_event(
            TaskEvent::new(TaskEventType::PluginUnhealthy).set_message(format!("Error: {reason}")),
        );

        let event = TaskEvent::new(TaskEventType::Killing)
            .set_fails_task()
            .set_display_message(format!(
                "Ingress plugin did not become healthy before configured {} health timeout",
                format_timeout(self.config.startup_timeout())
            ));
        if let Err(e) = self.lifecycle.kill(event).await {
            log_error("supervisor_hook", "kill_task", &e.to_string(), Some(&reason));
        }
        log_plugin_operation(
            "kill_task",
            INGRESS_PLUGIN_TYPE,
            &self.plugin.id,
            Some(&self.alloc_id),
            "killed",
            Some(&reason),
        );
    }
}

async fn probe_once(client: &dyn IngressPlugin, bound: Duration) -> std::result::Result<bool, PluginError> {
    match tokio::time::timeout(bound, client.probe(bound)).await {
        Ok(result) => result,
        Err(_) => Err(PluginError::timeout("probing plugin", None)),
    }
}

fn format_timeout(timeout: Duration) -> String {
    format!("{timeout:?}")
}
