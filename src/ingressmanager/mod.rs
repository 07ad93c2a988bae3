//! # Ingress Plugin Manager
//!
//! Keeps one fingerprinting supervisor alive for every ingress plugin known
//! to the dynamic registry, and reports their health into cluster state.
//!
//! ## Architecture
//!
//! ```text
//! IngressManager (set manager)
//!   ├── resync loop: periodic full list + registry update stream
//!   └── type -> name -> InstanceManager
//!                         └── Fingerprinter -> IngressPlugin client
//! ```

pub mod fingerprint;
pub mod instance;
pub mod manager;

use async_trait::async_trait;
use std::sync::Arc;

pub use fingerprint::Fingerprinter;
pub use instance::{InstanceManager, InstanceState};
pub use manager::IngressManager;

use crate::structs::{HealthSnapshot, NodeEvent};

/// Receives every fingerprint, keyed by plugin name. Must not block.
pub type UpdateIngressInfoFn = Arc<dyn Fn(&str, HealthSnapshot) + Send + Sync>;

/// Receives manager-level node events
pub type TriggerNodeEventFn = Arc<dyn Fn(NodeEvent) + Send + Sync>;

/// Lifecycle seam shared by the node's plugin managers
#[async_trait]
pub trait PluginManager: Send + Sync {
    /// Registry plugin type this manager supervises
    fn plugin_type(&self) -> &str;

    /// Start background work and return immediately
    fn run(&self);

    /// Stop everything; returns only once all supervision has exited
    async fn shutdown(&self);
}
