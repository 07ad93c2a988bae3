//! Full path over a real unix socket: the supervisor hook brings a flaky
//! plugin up, registers it, and the ingress manager starts fingerprinting it.

mod common;

use common::*;
use ingress_supervisor::config::{ClientConfig, ManagerConfig, SupervisorConfig};
use ingress_supervisor::dynamicplugins::{DynamicRegistry, InMemoryRegistry};
use ingress_supervisor::ingressmanager::{IngressManager, PluginManager};
use ingress_supervisor::plugins::{serve, SocketClientFactory};
use ingress_supervisor::structs::{
    IngressClass, InternalIngressClassConfig, Task, TaskEventType, TaskIngressPluginConfig,
};
use ingress_supervisor::taskrunner::{
    HookResources, IngressPluginSupervisorHook, IngressPluginSupervisorHookConfig, TaskHook,
    TaskPrestartRequest,
};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

fn fast_client() -> ClientConfig {
    ClientConfig {
        connect_retry_interval_ms: 50,
        dial_timeout_ms: 50,
    }
}

fn fast_supervisor() -> SupervisorConfig {
    SupervisorConfig {
        startup_timeout_ms: 5_000,
        startup_retry_interval_ms: 50,
        monitor_interval_ms: 200,
        probe_timeout_ms: 500,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_flaky_plugin_becomes_available_to_manager() {
    let state_dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(InMemoryRegistry::new());
    let factory = Arc::new(SocketClientFactory::new(fast_client()));
    let task = RecordingTask::new();

    let hook = IngressPluginSupervisorHook::new(IngressPluginSupervisorHookConfig {
        alloc_id: "alloc-e2e".to_string(),
        task: Task {
            name: "haproxy".to_string(),
            env: HashMap::new(),
            ingress_plugin_config: Some(TaskIngressPluginConfig {
                id: "edge-lb".to_string(),
                class: IngressClass::Internal,
                internal: Some(InternalIngressClassConfig {
                    lb_conf_path: "/etc/haproxy/haproxy.cfg".to_string(),
                }),
                ..Default::default()
            }),
        },
        client_state_dir: state_dir.path().to_path_buf(),
        supervisor: fast_supervisor(),
        registry: registry.clone(),
        factory: factory.clone(),
        events: task.clone(),
        lifecycle: task.clone(),
        resources: Arc::new(HookResources::new()),
    })
    .unwrap();

    hook.prestart(&TaskPrestartRequest::default()).await.unwrap();
    let socket_path = hook.socket_path().unwrap();

    // the plugin process comes up inside the mounted directory
    let handler = FlakyHandler::new(2);
    let listener = UnixListener::bind(&socket_path).unwrap();
    let server_token = CancellationToken::new();
    let server = tokio::spawn(serve(listener, handler.clone(), server_token.clone()));

    let updater = RecordingUpdater::new();
    let manager = IngressManager::new(
        ManagerConfig {
            fingerprint_interval_ms: 100,
            ..Default::default()
        },
        registry.clone(),
        factory,
        updater.callback(),
        None,
    );

    hook.poststart().await.unwrap();
    manager.run();

    // default one minute bound
    manager.wait_for_plugin("ingress", "edge-lb").await.unwrap();

    let plugins = registry.list_plugins("ingress").await;
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].name, "edge-lb");
    assert_eq!(plugins[0].alloc_id, "alloc-e2e");
    assert_eq!(plugins[0].provider(), "haproxy");
    assert_eq!(plugins[0].version, "2.8.3");
    assert_eq!(plugins[0].socket_path(), socket_path);
    assert_eq!(
        plugins[0].options.get("LBConfPath").map(String::as_str),
        Some("/etc/haproxy/haproxy.cfg")
    );
    assert!(handler.probes.load(Ordering::SeqCst) >= 3);
    assert_eq!(task.count(TaskEventType::PluginHealthy), 1);
    assert!(task.kills.lock().is_empty());

    manager
        .wait_for_first_fingerprint(Duration::from_secs(5))
        .await
        .unwrap();
    let first = updater.for_plugin("edge-lb").into_iter().next().unwrap();
    assert!(first.healthy);
    assert_eq!(first.provider, "haproxy");
    assert_eq!(first.provider_version, "2.8.3");

    hook.stop().await.unwrap();
    manager.shutdown().await;
    server_token.cancel();
    server.await.unwrap().unwrap();

    assert!(registry.list_plugins("ingress").await.is_empty());
    assert!(!state_dir.path().join("ingress/plugins/alloc-e2e").exists());
}
