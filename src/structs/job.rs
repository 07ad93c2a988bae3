//! Job, task group and task definitions, reduced to what plugin expectation
//! accounting needs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::ingress::TaskIngressPluginConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Service,
    Batch,
    System,
    Sysbatch,
}

impl JobType {
    /// System-style jobs run one instance per eligible node, so their
    /// nominal group count says nothing about how many instances exist.
    pub fn is_system(&self) -> bool {
        matches!(self, JobType::System | JobType::Sysbatch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub namespace: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub ingress_plugin_config: Option<TaskIngressPluginConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub name: String,
    pub count: usize,
    pub tasks: Vec<Task>,
}

impl TaskGroup {
    pub fn uses_ingress_plugin(&self, plugin_id: &str) -> bool {
        self.tasks.iter().any(|t| {
            t.ingress_plugin_config
                .as_ref()
                .is_some_and(|c| c.id == plugin_id)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskGroupSummary {
    pub queued: usize,
    pub starting: usize,
    pub running: usize,
    pub complete: usize,
    pub failed: usize,
    pub lost: usize,
}

impl TaskGroupSummary {
    pub fn live(&self) -> usize {
        self.queued + self.starting + self.running
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobSummary {
    pub task_groups: HashMap<String, TaskGroupSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub namespace: String,
    pub job_type: JobType,
    #[serde(default)]
    pub stop: bool,
    pub task_groups: Vec<TaskGroup>,
    #[serde(default)]
    pub summary: Option<JobSummary>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey {
            namespace: self.namespace.clone(),
            id: self.id.clone(),
        }
    }

    /// IDs of every ingress plugin a task in this job provides
    pub fn ingress_plugin_ids(&self) -> BTreeSet<String> {
        self.task_groups
            .iter()
            .flat_map(|tg| tg.tasks.iter())
            .filter_map(|t| t.ingress_plugin_config.as_ref().map(|c| c.id.clone()))
            .collect()
    }

    /// Number of plugin instances this job is expected to run for `plugin_id`
    pub fn expected_instances(&self, plugin_id: &str) -> usize {
        if self.stop {
            return 0;
        }
        self.task_groups
            .iter()
            .filter(|tg| tg.uses_ingress_plugin(plugin_id))
            .map(|tg| {
                if self.job_type.is_system() {
                    self.summary
                        .as_ref()
                        .and_then(|s| s.task_groups.get(&tg.name))
                        .map(TaskGroupSummary::live)
                        .unwrap_or(0)
                } else {
                    tg.count
                }
            })
            .sum()
    }
}
