//! Seams between task hooks and the task runner that drives them.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::structs::TaskEvent;

/// Controls the lifecycle of the task a hook is attached to
#[async_trait]
pub trait TaskLifecycle: Send + Sync {
    /// Kill the task, recording `event` as the terminal event
    async fn kill(&self, event: TaskEvent) -> Result<()>;
}

/// Appends events to the task's history
pub trait EventEmitter: Send + Sync {
    fn emit_event(&self, event: TaskEvent);
}

#[derive(Debug, Clone, Default)]
pub struct TaskPrestartRequest {
    /// Environment the task runner has built so far
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPrestartResponse {
    /// Variables to add to the task environment
    pub env: HashMap<String, String>,
}

/// A participant in a task's lifecycle. Every touchpoint may be called
/// repeatedly across task restarts, and `stop` may be called without the
/// others ever having run.
#[async_trait]
pub trait TaskHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prestart(&self, request: &TaskPrestartRequest) -> Result<TaskPrestartResponse>;

    async fn poststart(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub task_path: PathBuf,
    pub host_path: PathBuf,
    pub readonly: bool,
    pub propagation_mode: String,
}

/// Resources hooks contribute to the task, shared across all of its hooks
#[derive(Debug, Default)]
pub struct HookResources {
    mounts: RwLock<Vec<MountConfig>>,
}

impl HookResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mounts(&self) -> Vec<MountConfig> {
        self.mounts.read().clone()
    }

    pub fn set_mounts(&self, mounts: Vec<MountConfig>) {
        *self.mounts.write() = mounts;
    }

    /// Add `mount` unless an identical one is already present. Returns
    /// whether it was added.
    pub fn ensure_mountpoint_inserted(&self, mount: MountConfig) -> bool {
        let mut mounts = self.mounts.write();
        if mounts.contains(&mount) {
            return false;
        }
        mounts.push(mount);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_insertion_is_idempotent() {
        let resources = HookResources::new();
        let mount = MountConfig {
            task_path: PathBuf::from("/opt"),
            host_path: PathBuf::from("/var/lib/client/ingress/plugins/a1"),
            readonly: false,
            propagation_mode: "bidirectional".to_string(),
        };

        assert!(resources.ensure_mountpoint_inserted(mount.clone()));
        assert!(!resources.ensure_mountpoint_inserted(mount.clone()));

        let mut other = mount.clone();
        other.readonly = true;
        assert!(resources.ensure_mountpoint_inserted(other));
        assert_eq!(resources.mounts().len(), 2);
    }
}
