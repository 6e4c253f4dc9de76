use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Action the gate controller is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCommand {
    Open,
    /// Any action this build does not know about. Controllers reject it.
    #[serde(other)]
    Unknown,
}

/// One open-gate attempt as the backend sees it.
///
/// Immutable once created; only [`CommandMessage`] goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    /// Correlation and idempotency key.
    pub request_id: Uuid,
    /// Authenticated user who asked for the open.
    pub user_id: String,
    /// The caller's session device (not the gate controller).
    pub device_id: String,
    pub command: GateCommand,
    /// Server clock at creation, strictly increasing within a process.
    pub issued_at: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn open(
        request_id: Uuid,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            user_id: user_id.into(),
            device_id: device_id.into(),
            command: GateCommand::Open,
            issued_at,
        }
    }

    /// The payload published on the command topic.
    pub fn message(&self) -> CommandMessage {
        CommandMessage {
            request_id: self.request_id,
            command: self.command,
            user_id: self.user_id.clone(),
            issued_at: self.issued_at.timestamp_millis(),
        }
    }
}

/// Command topic payload: `{requestId, command, userId, issuedAt}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    pub request_id: Uuid,
    pub command: GateCommand,
    pub user_id: String,
    /// Unix epoch milliseconds.
    pub issued_at: i64,
}

/// Ack topic payload: `{requestId, ok, errorCode?, timestamp?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMessage {
    pub request_id: Uuid,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Unix epoch milliseconds on the controller clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl AckMessage {
    pub fn success(request_id: Uuid) -> Self {
        Self {
            request_id,
            ok: true,
            error_code: None,
            timestamp: Some(now_millis()),
        }
    }

    pub fn failure(request_id: Uuid, error_code: impl Into<String>) -> Self {
        Self {
            request_id,
            ok: false,
            error_code: Some(error_code.into()),
            timestamp: Some(now_millis()),
        }
    }
}

/// Current wall clock as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
