//! Task-level hooks that run alongside plugin workloads.

pub mod ingress_supervisor_hook;
pub mod interfaces;

pub use ingress_supervisor_hook::{IngressPluginSupervisorHook, IngressPluginSupervisorHookConfig};
pub use interfaces::{
    EventEmitter, HookResources, MountConfig, TaskHook, TaskLifecycle, TaskPrestartRequest,
    TaskPrestartResponse,
};
