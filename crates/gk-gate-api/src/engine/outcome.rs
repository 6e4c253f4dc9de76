use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The single result of one open-gate attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Controller acked with `ok = true`.
    Opened,
    /// Controller acked with `ok = false`.
    DeviceRejected { error_code: Option<String> },
    /// No ack before the deadline. The command may still have been executed.
    TimedOut,
    /// Throttle window exhausted for this user.
    RateLimited { retry_after: Duration },
    /// Another attempt for this user (or this requestId) is still running.
    AlreadyInFlight,
    /// The command could not be published.
    TransportUnavailable { reason: String },
}

impl GateOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            GateOutcome::Opened => OutcomeKind::Opened,
            GateOutcome::DeviceRejected { .. } => OutcomeKind::DeviceRejected,
            GateOutcome::TimedOut => OutcomeKind::TimedOut,
            GateOutcome::RateLimited { .. } => OutcomeKind::RateLimited,
            GateOutcome::AlreadyInFlight => OutcomeKind::AlreadyInFlight,
            GateOutcome::TransportUnavailable { .. } => OutcomeKind::Unavailable,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            GateOutcome::DeviceRejected { error_code } => error_code.as_deref(),
            _ => None,
        }
    }

    /// Whether the command reached the transport.
    pub fn was_published(&self) -> bool {
        matches!(
            self,
            GateOutcome::Opened | GateOutcome::DeviceRejected { .. } | GateOutcome::TimedOut
        )
    }

    /// Outcomes a replayed requestId may return. Guard rejections and
    /// unpublished attempts are safe to retry under the same id.
    pub fn is_replayable(&self) -> bool {
        self.was_published()
    }
}

/// Stable outcome label used in responses, logs and audit rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Opened,
    DeviceRejected,
    TimedOut,
    RateLimited,
    AlreadyInFlight,
    Unavailable,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Opened => "opened",
            OutcomeKind::DeviceRejected => "device_rejected",
            OutcomeKind::TimedOut => "timed_out",
            OutcomeKind::RateLimited => "rate_limited",
            OutcomeKind::AlreadyInFlight => "already_in_flight",
            OutcomeKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outcome '{0}'")]
pub struct UnknownOutcome(pub String);

impl FromStr for OutcomeKind {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(OutcomeKind::Opened),
            "device_rejected" => Ok(OutcomeKind::DeviceRejected),
            "timed_out" => Ok(OutcomeKind::TimedOut),
            "rate_limited" => Ok(OutcomeKind::RateLimited),
            "already_in_flight" => Ok(OutcomeKind::AlreadyInFlight),
            "unavailable" => Ok(OutcomeKind::Unavailable),
            other => Err(UnknownOutcome(other.to_string())),
        }
    }
}
