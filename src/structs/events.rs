//! Task and node events surfaced by the supervision subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::constants::NODE_EVENT_SUBSYSTEM;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskEventType {
    PluginHealthy,
    PluginUnhealthy,
    Killing,
}

impl fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEventType::PluginHealthy => write!(f, "Plugin became healthy"),
            TaskEventType::PluginUnhealthy => write!(f, "Plugin became unhealthy"),
            TaskEventType::Killing => write!(f, "Killing"),
        }
    }
}

/// Event attached to a task's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_type: TaskEventType,
    pub time: DateTime<Utc>,
    pub message: String,
    pub display_message: String,
    /// Set on kill events that must mark the task failed
    pub fails_task: bool,
}

impl TaskEvent {
    pub fn new(event_type: TaskEventType) -> Self {
        Self {
            event_type,
            time: Utc::now(),
            message: String::new(),
            display_message: String::new(),
            fails_task: false,
        }
    }

    pub fn set_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn set_display_message(mut self, message: impl Into<String>) -> Self {
        self.display_message = message.into();
        self
    }

    pub fn set_fails_task(mut self) -> Self {
        self.fails_task = true;
        self
    }
}

/// Manager-level event reported against the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub subsystem: String,
    pub message: String,
    pub details: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl NodeEvent {
    pub fn ingress(message: impl Into<String>) -> Self {
        Self {
            subsystem: NODE_EVENT_SUBSYSTEM.to_string(),
            message: message.into(),
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn add_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
