//! Wire protocol between the supervisor and a plugin process.
//!
//! One JSON object per line in each direction; every request gets exactly
//! one response on the same connection.

use serde::{Deserialize, Serialize};

use super::{PluginError, PluginInfoResponse, PluginResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PluginRequest {
    Probe,
    Info,
    CreateRoutes { alloc_id: String },
    ChangeOrDeleteRoutes { alloc_id: String },
}

impl PluginRequest {
    pub fn method(&self) -> &'static str {
        match self {
            PluginRequest::Probe => "probe",
            PluginRequest::Info => "info",
            PluginRequest::CreateRoutes { .. } => "create_routes",
            PluginRequest::ChangeOrDeleteRoutes { .. } => "change_or_delete_routes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PluginResponse {
    Probe { healthy: bool },
    Info(PluginInfoResponse),
    Ack,
    Error { message: String },
}

/// Encode a frame, newline-terminated
pub fn encode<T: Serialize>(frame: &T) -> PluginResult<String> {
    let mut line =
        serde_json::to_string(frame).map_err(|e| PluginError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

pub fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> PluginResult<T> {
    serde_json::from_str(line.trim_end()).map_err(|e| PluginError::Protocol(e.to_string()))
}
