//! Control-plane wire types.
//!
//! Framing is newline-delimited JSON: one request object per line, one
//! response object per line. These types are shared by the daemon dispatcher
//! and the CLI client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request envelope: `{ "method": <string>, "params": <object|null> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn bare(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }
}

/// Response envelope: `{ "success": <bool>, "data": <any>, "error": <string> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: String,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: String::new(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: message.into(),
        }
    }
}

/// Parameters for `start`. Only `command` is required; everything else
/// falls back to daemon defaults. Durations and sizes arrive as strings
/// (`"500ms"`, `"1M"`) and are parsed by the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartParams {
    pub command: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub autorestart: Option<String>,
    #[serde(default)]
    pub max_restarts: Option<u32>,
    #[serde(default)]
    pub min_uptime: Option<String>,
    #[serde(default)]
    pub restart_delay: Option<String>,
    #[serde(default)]
    pub exp_backoff: Option<bool>,
    #[serde(default)]
    pub max_delay: Option<String>,
    #[serde(default)]
    pub kill_timeout: Option<String>,
    #[serde(default)]
    pub restart_exit_codes: Vec<i32>,
    #[serde(default)]
    pub no_restart_exit_codes: Vec<i32>,
    #[serde(default)]
    pub max_log_size: Option<String>,
    #[serde(default)]
    pub log_rotate: Option<u32>,
}

/// Parameters for the target-selecting methods (`stop`, `restart`,
/// `delete`, `flush`, `describe`, `isrunning`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetParams {
    pub target: String,
}

/// Parameters for `logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsParams {
    pub target: String,
    #[serde(default)]
    pub lines: Option<usize>,
    #[serde(default)]
    pub err_only: bool,
}

/// Parameters for `stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub hours: Option<i64>,
}

/// Public view of one managed process, as returned by `list`/`describe`
/// and persisted inside dump records for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: u64,
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    pub pid: u32,
    pub restarts: u32,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Seconds since the most recent successful spawn; 0 when not online.
    pub uptime: u64,
    pub cpu: f64,
    pub memory: u64,
    #[serde(default)]
    pub listeners: Vec<String>,
    pub autorestart: String,
    pub created_at: i64,
}

/// Reduced view returned by `isrunning`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningInfo {
    pub name: String,
    pub running: bool,
    pub status: String,
    pub pid: u32,
    pub uptime: u64,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub restarts: u32,
}
