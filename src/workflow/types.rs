//! Core workflow type definitions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{DEFAULT_AUTH_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_QR_TIMEOUT_SECS};
use crate::error::{Error, ErrorKind};

/// Unique identifier for one claimed relogin run.
///
/// Keys are reused across runs; the id tells two runs for the same key apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// States of the relogin state machine.
///
/// Progress is forward-only:
/// RestartingProtocol -> WaitingForQRCode <-> SendingQRCode -> WaitingForAuth
/// -> RestartingCore -> Finished. Failed and Cancelled are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    RestartingProtocol,
    WaitingForQrCode,
    SendingQrCode,
    WaitingForAuth,
    RestartingCore,
    Finished,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Finished | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::RestartingProtocol => write!(f, "restarting_protocol"),
            WorkflowState::WaitingForQrCode => write!(f, "waiting_for_qr_code"),
            WorkflowState::SendingQrCode => write!(f, "sending_qr_code"),
            WorkflowState::WaitingForAuth => write!(f, "waiting_for_auth"),
            WorkflowState::RestartingCore => write!(f, "restarting_core"),
            WorkflowState::Finished => write!(f, "finished"),
            WorkflowState::Failed => write!(f, "failed"),
            WorkflowState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// External signals a running workflow accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Continue,
    Cancel,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Continue => write!(f, "continue"),
            SignalKind::Cancel => write!(f, "cancel"),
        }
    }
}

/// Events delivered to whoever started a workflow, in transition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StateChanged {
        key: String,
        state: WorkflowState,
        message: String,
    },
    /// A fresh QR code is ready for the operator.
    ArtifactReady {
        key: String,
        /// Base64 of the QR image.
        content: String,
        generated_at: DateTime<Utc>,
    },
    Failed {
        key: String,
        kind: ErrorKind,
        reason: String,
    },
    Finished {
        key: String,
    },
}

impl WorkflowEvent {
    pub fn key(&self) -> &str {
        match self {
            WorkflowEvent::StateChanged { key, .. }
            | WorkflowEvent::ArtifactReady { key, .. }
            | WorkflowEvent::Failed { key, .. }
            | WorkflowEvent::Finished { key } => key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::StateChanged { .. } => "state_changed",
            WorkflowEvent::ArtifactReady { .. } => "artifact_ready",
            WorkflowEvent::Failed { .. } => "failed",
            WorkflowEvent::Finished { .. } => "finished",
        }
    }
}

/// How a workflow task ended.
#[derive(Debug)]
pub enum WorkflowOutcome {
    Finished,
    Failed(Error),
    Cancelled,
}

impl WorkflowOutcome {
    pub fn state(&self) -> WorkflowState {
        match self {
            WorkflowOutcome::Finished => WorkflowState::Finished,
            WorkflowOutcome::Failed(_) => WorkflowState::Failed,
            WorkflowOutcome::Cancelled => WorkflowState::Cancelled,
        }
    }
}

/// Timings and artifact location for a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// QR image path inside the protocol instance's scope.
    pub qr_file: String,
    pub poll_interval: Duration,
    pub qr_timeout: Duration,
    pub auth_timeout: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            qr_file: "qrcode.png".to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            qr_timeout: Duration::from_secs(DEFAULT_QR_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
        }
    }
}

/// Resolved targets for one relogin run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTargets {
    /// Protocol adapter instance that produces the QR code.
    pub protocol_id: String,
    /// Downstream core instance restarted after confirmation.
    pub core_id: String,
}
