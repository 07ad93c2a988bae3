//! Plugin fingerprinting.
//!
//! A [`Fingerprinter`] turns one probe of a plugin into a [`HealthSnapshot`].
//! Identity fields come from the registry entry and are captured once; only
//! the health fields change between cycles.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::dynamicplugins::PluginInfo;
use crate::plugins::{IngressPlugin, PluginError};
use crate::structs::HealthSnapshot;

#[derive(Debug)]
pub struct Fingerprinter {
    info: Arc<PluginInfo>,
    client: Option<Arc<dyn IngressPlugin>>,
    basic: Option<HealthSnapshot>,
    had_first_success: bool,
    /// Flipped to `true` exactly once, on the first successful probe
    ready: watch::Sender<bool>,
}

impl Fingerprinter {
    pub fn new(info: Arc<PluginInfo>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            info,
            client: None,
            basic: None,
            had_first_success: false,
            ready,
        }
    }

    pub fn set_client(&mut self, client: Arc<dyn IngressPlugin>) {
        self.client = Some(client);
    }

    /// Receiver for the first-success latch
    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// The cached identity snapshot, once the first cycle has built it
    pub fn basic_snapshot(&self) -> Option<&HealthSnapshot> {
        self.basic.as_ref()
    }

    /// Run one fingerprint cycle bounded by `timeout`.
    ///
    /// Returns `None` only when no client is wired yet, meaning "no new
    /// information". A failed probe still yields a snapshot, marked unhealthy.
    pub async fn fingerprint(&mut self, timeout: Duration) -> Option<HealthSnapshot> {
        let basic = self
            .basic
            .get_or_insert_with(|| build_basic_snapshot(&self.info))
            .clone();

        let client = self.client.clone()?;

        let mut snapshot = basic;
        match probe(client.as_ref(), timeout).await {
            Ok(healthy) => {
                snapshot.set_healthy(healthy);
                if !self.had_first_success {
                    self.had_first_success = true;
                    self.ready.send_replace(true);
                    debug!(
                        plugin_name = %self.info.name,
                        alloc_id = %self.info.alloc_id,
                        "First successful fingerprint"
                    );
                }
            }
            Err(e) => {
                trace!(plugin_name = %self.info.name, error = %e, "Fingerprint probe failed");
                snapshot.set_unhealthy(format!("failed fingerprinting with error: {e}"));
            }
        }
        Some(snapshot)
    }
}

fn build_basic_snapshot(info: &PluginInfo) -> HealthSnapshot {
    HealthSnapshot::initial(
        info.name.clone(),
        info.alloc_id.clone(),
        info.provider(),
        info.version.clone(),
    )
}

async fn probe(client: &dyn IngressPlugin, bound: Duration) -> Result<bool, PluginError> {
    // Clients honour their own bound; the outer one covers misbehaving ones
    match tokio::time::timeout(bound, client.probe(bound)).await {
        Ok(result) => result,
        Err(_) => Err(PluginError::timeout("probing plugin", None)),
    }
}
