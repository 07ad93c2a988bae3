#![allow(clippy::doc_markdown)] // Allow technical terms like NodeEvent, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Ingress Supervisor
//!
//! Supervision of dynamic ingress plugins on a cluster node.
//!
//! ## Overview
//!
//! Ingress plugins run as ordinary workload tasks and expose a small
//! capability interface over a Unix socket. This crate keeps them honest:
//!
//! - a **task supervisor hook** runs next to each plugin task, waits for it to
//!   become healthy, kills the task if it never does, and registers it in the
//!   node's dynamic plugin registry;
//! - an **ingress manager** follows that registry and keeps one
//!   **instance manager** per registered plugin, fingerprinting it on a fixed
//!   interval and reporting the result into cluster state;
//! - a **state store** and **query endpoint** aggregate those reports per
//!   plugin across nodes.
//!
//! ## Module Organization
//!
//! - [`plugins`] - `IngressPlugin` capability trait, wire protocol, socket client and server
//! - [`dynamicplugins`] - Registry of plugins running as tasks, with update notifications
//! - [`ingressmanager`] - Fingerprinter, instance manager and registry reconciler
//! - [`taskrunner`] - Task hook seams and the supervisor hook
//! - [`structs`] - Health snapshots, cluster plugin records, jobs and events
//! - [`state`] - Cluster-side plugin tables with blocking-query support
//! - [`endpoint`] - List/Get queries over plugin records
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ingress_supervisor::config::ConfigManager;
//! use ingress_supervisor::dynamicplugins::InMemoryRegistry;
//! use ingress_supervisor::ingressmanager::{IngressManager, PluginManager, UpdateIngressInfoFn};
//! use ingress_supervisor::plugins::SocketClientFactory;
//!
//! # async fn example() -> ingress_supervisor::Result<()> {
//! ingress_supervisor::logging::init_structured_logging();
//! let config = ConfigManager::load()?;
//!
//! let updater: UpdateIngressInfoFn = Arc::new(|name, snapshot| {
//!     tracing::info!(plugin = %name, healthy = snapshot.healthy, "fingerprint");
//! });
//! let manager = IngressManager::new(
//!     config.config().manager.clone(),
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(SocketClientFactory::new(config.config().client.clone())),
//!     updater,
//!     None,
//! );
//! manager.run();
//! manager.wait_for_plugin("ingress", "edge-lb").await?;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod dynamicplugins;
pub mod endpoint;
pub mod error;
pub mod ingressmanager;
pub mod logging;
pub mod plugins;
pub mod state;
pub mod structs;
pub mod taskrunner;

pub use config::{ConfigManager, IngressConfig};
pub use dynamicplugins::{DynamicRegistry, InMemoryRegistry, PluginInfo};
pub use error::{IngressError, Result};
pub use ingressmanager::{IngressManager, InstanceManager, PluginManager};
pub use plugins::{IngressPlugin, PluginError, SocketClientFactory, SocketPluginClient};
pub use state::IngressStateStore;
pub use structs::{ClusterPluginRecord, HealthSnapshot};
pub use taskrunner::{IngressPluginSupervisorHook, TaskHook};
