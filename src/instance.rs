//! Lifecycle control of remotely managed instances.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle actions an instance accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceAction {
    Start,
    Stop,
    Restart,
    ForceStop,
}

impl std::fmt::Display for InstanceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceAction::Start => write!(f, "start"),
            InstanceAction::Stop => write!(f, "stop"),
            InstanceAction::Restart => write!(f, "restart"),
            InstanceAction::ForceStop => write!(f, "fstop"),
        }
    }
}

impl std::str::FromStr for InstanceAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(InstanceAction::Start),
            "stop" => Ok(InstanceAction::Stop),
            "restart" => Ok(InstanceAction::Restart),
            "fstop" | "force_stop" | "kill" => Ok(InstanceAction::ForceStop),
            other => Err(Error::InvalidInput(format!("unknown action: {}", other))),
        }
    }
}

/// Run status reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Busy,
    Stopped,
    Stopping,
    Starting,
    Running,
    Unknown,
}

impl InstanceStatus {
    /// Map the panel's numeric status code.
    pub fn from_code(code: i64) -> Self {
        match code {
            -1 => InstanceStatus::Busy,
            0 => InstanceStatus::Stopped,
            1 => InstanceStatus::Stopping,
            2 => InstanceStatus::Starting,
            3 => InstanceStatus::Running,
            _ => InstanceStatus::Unknown,
        }
    }
}

/// Status snapshot of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDetail {
    pub instance_id: String,
    pub nickname: String,
    pub status: InstanceStatus,
    pub cpu_usage: Option<f64>,
    pub memory: Option<u64>,
}

/// Panel-wide overview, used when no target is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub version: String,
    pub remote_total: u64,
    pub remote_available: u64,
}

/// Issues lifecycle actions and status queries against remote instances.
#[async_trait]
pub trait InstanceController: Send + Sync {
    async fn action(&self, instance_id: &str, action: InstanceAction) -> Result<()>;

    async fn detail(&self, instance_id: &str) -> Result<InstanceDetail>;

    async fn dashboard(&self) -> Result<Dashboard>;
}
