//! Shared data model: health snapshots, cluster plugin records, jobs and events.

pub mod events;
pub mod ingress;
pub mod job;

pub use events::{NodeEvent, TaskEvent, TaskEventType};
pub use ingress::{
    AllocListStub, ClusterPluginRecord, ExternalIngressClassConfig, HealthSnapshot,
    IngressClass, IngressPluginListStub, InternalIngressClassConfig, TaskIngressPluginConfig,
};
pub use job::{Job, JobKey, JobSummary, JobType, Task, TaskGroup, TaskGroupSummary};
