//! Command dispatcher: publish one envelope, wait for its ack or the
//! deadline, clean up.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use gk_mqtt_channel::{Channel, publish_json};
use gk_protocol::{AckMessage, CommandEnvelope, TopicSet};

use super::correlation::{AckDisposition, CorrelationTable};
use super::outcome::GateOutcome;

/// Strictly increasing `issuedAt` source for one process.
#[derive(Debug, Default)]
pub struct IssueClock {
    last_ms: AtomicI64,
}

impl IssueClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall clock in ms, bumped past the previous value if needed.
    pub fn next(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let issued = now.max(prev + 1);
        DateTime::from_timestamp_millis(issued).unwrap_or_else(Utc::now)
    }
}

/// What `dispatch` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub request_id: Uuid,
    pub outcome: GateOutcome,
    pub issued_at: DateTime<Utc>,
    /// A publish was attempted, successful or not.
    pub attempted: bool,
}

pub struct Dispatcher {
    channel: Option<Arc<dyn Channel>>,
    topics: TopicSet,
    table: Arc<CorrelationTable>,
    ack_timeout: Duration,
    clock: IssueClock,
}

impl Dispatcher {
    /// `channel = None` means no transport is configured; every dispatch
    /// resolves `TransportUnavailable` at once.
    pub fn new(channel: Option<Arc<dyn Channel>>, topics: TopicSet, ack_timeout: Duration) -> Self {
        Self {
            channel,
            topics,
            table: Arc::new(CorrelationTable::new()),
            ack_timeout,
            clock: IssueClock::new(),
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn has_transport(&self) -> bool {
        self.channel.is_some()
    }

    pub fn pending(&self) -> usize {
        self.table.len()
    }

    /// Run one command/ack exchange.
    pub async fn dispatch(
        &self,
        user_id: &str,
        device_id: &str,
        request_id: Option<Uuid>,
    ) -> Dispatched {
        let request_id = request_id.unwrap_or_else(Uuid::now_v7);
        let envelope = CommandEnvelope::open(request_id, user_id, device_id, self.clock.next());
        let issued_at = envelope.issued_at;
        let done = |outcome: GateOutcome, attempted: bool| Dispatched {
            request_id,
            outcome,
            issued_at,
            attempted,
        };

        let Some(channel) = &self.channel else {
            return done(
                GateOutcome::TransportUnavailable {
                    reason: "MQTT transport not configured".into(),
                },
                false,
            );
        };

        let pending = match self.table.register(request_id, self.ack_timeout) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "refusing duplicate dispatch");
                return done(GateOutcome::AlreadyInFlight, false);
            }
        };

        // `pending` is dropped on every early return, removing the entry.
        // The publish itself is bounded by the ack deadline.
        let message = envelope.message();
        let publish = publish_json(channel.as_ref(), &self.topics.command, &message);
        let reason = match tokio::time::timeout_at(pending.deadline(), publish).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("publish did not complete before the ack deadline".to_string()),
        };
        if let Some(reason) = reason {
            tracing::error!(request_id = %request_id, error = %reason, "failed to publish gate command");
            return done(GateOutcome::TransportUnavailable { reason }, true);
        }
        tracing::debug!(request_id = %request_id, topic = %self.topics.command, "gate command published");

        let outcome = match pending.wait().await {
            Some(ack) if ack.ok => GateOutcome::Opened,
            Some(ack) => GateOutcome::DeviceRejected {
                error_code: ack.error_code,
            },
            None => GateOutcome::TimedOut,
        };
        done(outcome, true)
    }

    /// Feed an inbound ack. Returns whether it resolved a pending attempt.
    pub fn on_ack(&self, ack: AckMessage) -> bool {
        let request_id = ack.request_id;
        let ok = ack.ok;
        match self.table.resolve(ack) {
            AckDisposition::Applied => {
                tracing::debug!(request_id = %request_id, ok, "ack applied");
                true
            }
            AckDisposition::Discarded => {
                tracing::warn!(request_id = %request_id, ok, "ack for unknown or resolved request");
                false
            }
        }
    }
}
