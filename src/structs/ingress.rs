//! # Ingress Plugin Structures
//!
//! Node-side health snapshots, the cluster-wide plugin record aggregated from
//! every node's snapshots, and the task-level plugin configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::job::{Job, JobKey};
use crate::constants::INITIAL_FINGERPRINT_DESCRIPTION;
use crate::error::{IngressError, Result};

/// Where the managed load balancer lives relative to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IngressClass {
    /// Load balancer runs inside the cluster
    #[default]
    Internal,
    /// Load balancer runs outside the cluster
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InternalIngressClassConfig {
    pub lb_conf_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExternalIngressClassConfig {}

/// Marks a task as an ingress plugin; read by the supervisor hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskIngressPluginConfig {
    pub id: String,
    pub endpoint: String,
    pub token: String,
    pub class: IngressClass,
    pub internal: Option<InternalIngressClassConfig>,
    pub external: Option<ExternalIngressClassConfig>,
}

impl TaskIngressPluginConfig {
    /// Load balancer configuration path, for internal-class plugins only
    pub fn lb_conf_path(&self) -> Option<&str> {
        match self.class {
            IngressClass::Internal => self
                .internal
                .as_ref()
                .map(|c| c.lb_conf_path.as_str())
                .filter(|p| !p.is_empty()),
            IngressClass::External => None,
        }
    }
}

/// Fingerprint of one plugin instance on one node.
///
/// An unhealthy snapshot always carries a non-empty description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub plugin_id: String,
    pub alloc_id: String,
    pub provider: String,
    pub provider_version: String,
    pub healthy: bool,
    pub health_description: String,
    pub update_time: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    /// Snapshot for a plugin that has not been probed yet
    pub fn initial(
        plugin_id: impl Into<String>,
        alloc_id: impl Into<String>,
        provider: impl Into<String>,
        provider_version: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            alloc_id: alloc_id.into(),
            provider: provider.into(),
            provider_version: provider_version.into(),
            healthy: false,
            health_description: INITIAL_FINGERPRINT_DESCRIPTION.to_string(),
            update_time: None,
        }
    }

    pub fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
        self.health_description = if healthy { "healthy" } else { "unhealthy" }.to_string();
    }

    pub fn set_unhealthy(&mut self, description: impl Into<String>) {
        let description = description.into();
        self.healthy = false;
        self.health_description = if description.is_empty() {
            "unhealthy".to_string()
        } else {
            description
        };
    }
}

/// Allocation summary attached to a plugin record when it is read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocListStub {
    pub id: String,
    pub namespace: String,
    pub node_id: String,
    pub job_id: String,
    pub task_group: String,
    pub client_status: String,
}

impl AllocListStub {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.client_status.as_str(),
            "complete" | "failed" | "lost"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPluginListStub {
    pub id: String,
    pub provider: String,
    pub nodes_healthy: usize,
    pub nodes_expected: usize,
    pub create_index: u64,
    pub modify_index: u64,
}

/// Cluster-wide record of one logical plugin.
///
/// `nodes_healthy` is adjusted together with every edit of `nodes` and is
/// always equal to the number of healthy entries. `nodes_expected` is
/// recomputed in full from `jobs` whenever a job is added or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPluginRecord {
    pub id: String,
    pub provider: String,
    pub version: String,
    /// Reporting node id -> last snapshot from that node
    pub nodes: HashMap<String, HealthSnapshot>,
    pub nodes_healthy: usize,
    pub nodes_expected: usize,
    /// Jobs with a task providing this plugin
    pub jobs: HashMap<JobKey, Arc<Job>>,
    /// Filled by denormalization on read
    pub allocations: Vec<AllocListStub>,
    pub create_index: u64,
    pub modify_index: u64,
}

impl ClusterPluginRecord {
    pub fn new(id: impl Into<String>, index: u64) -> Self {
        Self {
            id: id.into(),
            provider: String::new(),
            version: String::new(),
            nodes: HashMap::new(),
            nodes_healthy: 0,
            nodes_expected: 0,
            jobs: HashMap::new(),
            allocations: Vec::new(),
            create_index: index,
            modify_index: index,
        }
    }

    /// Record `info` as the latest snapshot reported by `node_id`
    pub fn add_plugin(&mut self, node_id: &str, info: &HealthSnapshot) -> Result<()> {
        if info.plugin_id != self.id {
            return Err(IngressError::Validation(format!(
                "snapshot for plugin '{}' cannot be added to plugin '{}'",
                info.plugin_id, self.id
            )));
        }

        if !info.provider.is_empty() {
            self.provider = info.provider.clone();
        }
        if !info.provider_version.is_empty() {
            self.version = info.provider_version.clone();
        }

        if let Some(previous) = self.nodes.insert(node_id.to_string(), info.clone()) {
            if previous.healthy {
                self.nodes_healthy -= 1;
            }
        }
        if info.healthy {
            self.nodes_healthy += 1;
        }
        Ok(())
    }

    /// Forget everything `node_id` reported. Returns whether an entry existed.
    pub fn delete_node_for_type(&mut self, node_id: &str) -> bool {
        match self.nodes.remove(node_id) {
            Some(previous) => {
                if previous.healthy {
                    self.nodes_healthy -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// Forget `node_id`'s entry only if it was reported by `alloc_id`
    pub fn delete_alloc(&mut self, alloc_id: &str, node_id: &str) -> bool {
        let owned = self
            .nodes
            .get(node_id)
            .is_some_and(|snapshot| snapshot.alloc_id == alloc_id);
        if owned {
            self.delete_node_for_type(node_id)
        } else {
            false
        }
    }

    pub fn add_job(&mut self, job: Arc<Job>) {
        self.jobs.insert(job.key(), job);
        self.recompute_expected();
    }

    pub fn delete_job(&mut self, key: &JobKey) -> bool {
        let removed = self.jobs.remove(key).is_some();
        self.recompute_expected();
        removed
    }

    /// Track, update or drop `job` depending on whether it still provides
    /// this plugin and is not stopped
    pub fn update_expected_with_job(&mut self, job: Arc<Job>) {
        if job.stop || !job.ingress_plugin_ids().contains(&self.id) {
            self.delete_job(&job.key());
        } else {
            self.add_job(job);
        }
    }

    fn recompute_expected(&mut self) {
        self.nodes_expected = self
            .jobs
            .values()
            .map(|job| job.expected_instances(&self.id))
            .sum();
    }

    /// No node reports it and no job references it
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.jobs.is_empty()
    }

    pub fn stub(&self) -> IngressPluginListStub {
        IngressPluginListStub {
            id: self.id.clone(),
            provider: self.provider.clone(),
            nodes_healthy: self.nodes_healthy,
            nodes_expected: self.nodes_expected,
            create_index: self.create_index,
            modify_index: self.modify_index,
        }
    }
}
