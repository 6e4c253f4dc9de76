//! Gate command dispatch and correlation engine.
//!
//! One `GateEngine` per process, shared by the HTTP routes and the MQTT
//! bridge. An attempt flows through:
//!
//! ```text
//! idempotency claim → concurrency guard → dispatcher (publish, await ack)
//!   → release permit → audit
//! ```

pub mod audit;
pub mod correlation;
pub mod dispatcher;
pub mod guard;
pub mod idempotency;
pub mod outcome;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use gk_mqtt_channel::Channel;
use gk_protocol::{AckMessage, StatusMessage, TopicSet};

pub use audit::{AuditRecord, AuditRecorder, MemoryAuditRecorder, PgAuditRecorder, TransportTrace};
pub use dispatcher::Dispatcher;
pub use guard::{ConcurrencyGuard, Rejection, ThrottleConfig};
pub use idempotency::{Begin, IdempotencyCache};
pub use outcome::{GateOutcome, OutcomeKind};
pub use status::{DeviceSnapshot, Reachability, StatusTracker};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ack_timeout: Duration,
    pub throttle: ThrottleConfig,
    pub idempotency_ttl: Duration,
    pub heartbeat_interval: Duration,
    /// Gate controller whose reachability annotates outcomes.
    pub gate_device_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(2500),
            throttle: ThrottleConfig::default(),
            idempotency_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            gate_device_id: None,
        }
    }
}

/// Who is asking, as resolved by the identity layer, plus request context.
#[derive(Debug, Clone, Default)]
pub struct AttemptContext {
    pub user_id: String,
    pub device_id: String,
    pub request_id: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// What the caller gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub request_id: Uuid,
    pub outcome: GateOutcome,
    /// Served from the idempotency window; nothing was published.
    pub replayed: bool,
    /// Advisory gate controller state, if one is configured.
    pub device: Option<Reachability>,
}

pub struct GateEngine {
    dispatcher: Dispatcher,
    guard: ConcurrencyGuard,
    idempotency: IdempotencyCache,
    status: StatusTracker,
    audit: Arc<dyn AuditRecorder>,
    gate_device_id: Option<String>,
}

impl GateEngine {
    pub fn new(
        config: EngineConfig,
        channel: Option<Arc<dyn Channel>>,
        topics: TopicSet,
        audit: Arc<dyn AuditRecorder>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(channel, topics, config.ack_timeout),
            guard: ConcurrencyGuard::new(config.throttle),
            idempotency: IdempotencyCache::new(config.idempotency_ttl),
            status: StatusTracker::new(config.heartbeat_interval),
            audit,
            gate_device_id: config.gate_device_id,
        }
    }

    /// Run one open-gate attempt end to end. Never fails; every path ends
    /// in exactly one `GateOutcome`.
    pub async fn open_gate(&self, ctx: AttemptContext) -> AttemptResult {
        let started = Instant::now();
        let request_id = ctx.request_id.unwrap_or_else(Uuid::now_v7);

        let claim = match self.idempotency.begin(request_id, &ctx.user_id) {
            Begin::Started(claim) => claim,
            Begin::Replay(outcome) => {
                tracing::info!(
                    request_id = %request_id,
                    user_id = %ctx.user_id,
                    outcome = %outcome.kind(),
                    "replaying resolved gate request"
                );
                return self.result(request_id, outcome, true);
            }
            Begin::Conflict => {
                tracing::warn!(
                    request_id = %request_id,
                    user_id = %ctx.user_id,
                    "request id already in use"
                );
                let outcome = GateOutcome::AlreadyInFlight;
                self.record(&ctx, request_id, &outcome, started, false).await;
                return self.result(request_id, outcome, false);
            }
        };

        let permit = match self.guard.admit(&ctx.user_id) {
            Ok(permit) => permit,
            Err(rejection) => {
                drop(claim);
                let outcome = match rejection {
                    Rejection::AlreadyInFlight => {
                        tracing::warn!(user_id = %ctx.user_id, "blocked_in_flight");
                        GateOutcome::AlreadyInFlight
                    }
                    Rejection::RateLimited { retry_after } => {
                        tracing::warn!(
                            user_id = %ctx.user_id,
                            retry_after_secs = retry_after.as_secs(),
                            "blocked_rate_limit"
                        );
                        GateOutcome::RateLimited { retry_after }
                    }
                };
                self.record(&ctx, request_id, &outcome, started, false).await;
                return self.result(request_id, outcome, false);
            }
        };

        let dispatched = self
            .dispatcher
            .dispatch(&ctx.user_id, &ctx.device_id, Some(request_id))
            .await;
        claim.complete(&dispatched.outcome);
        permit.release();

        tracing::info!(
            request_id = %request_id,
            user_id = %ctx.user_id,
            device_id = %ctx.device_id,
            outcome = %dispatched.outcome.kind(),
            error_code = dispatched.outcome.error_code(),
            duration_ms = started.elapsed().as_millis() as u64,
            "gate attempt resolved"
        );

        self.record(
            &ctx,
            request_id,
            &dispatched.outcome,
            started,
            dispatched.attempted,
        )
        .await;
        self.result(request_id, dispatched.outcome, false)
    }

    /// Inbound ack from the bridge.
    pub fn handle_ack(&self, ack: AckMessage) -> bool {
        self.dispatcher.on_ack(ack)
    }

    /// Inbound heartbeat from the bridge. Returns whether it was newer
    /// than the held snapshot.
    pub fn handle_status(&self, status: StatusMessage) -> bool {
        self.status.on_status(status)
    }

    pub fn device_status(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.status.get(device_id)
    }

    pub fn status_tracker(&self) -> &StatusTracker {
        &self.status
    }

    pub fn audit(&self) -> &Arc<dyn AuditRecorder> {
        &self.audit
    }

    pub fn has_transport(&self) -> bool {
        self.dispatcher.has_transport()
    }

    pub fn gate_device_id(&self) -> Option<&str> {
        self.gate_device_id.as_deref()
    }

    fn result(&self, request_id: Uuid, outcome: GateOutcome, replayed: bool) -> AttemptResult {
        AttemptResult {
            request_id,
            outcome,
            replayed,
            device: self
                .gate_device_id
                .as_deref()
                .map(|id| self.status.reachability(id)),
        }
    }

    async fn record(
        &self,
        ctx: &AttemptContext,
        request_id: Uuid,
        outcome: &GateOutcome,
        started: Instant,
        attempted: bool,
    ) {
        let record = AuditRecord {
            request_id,
            user_id: ctx.user_id.clone(),
            device_id: ctx.device_id.clone(),
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            outcome: outcome.kind(),
            error_code: outcome.error_code().map(str::to_string),
            duration_ms: started.elapsed().as_millis() as i64,
            transport: TransportTrace {
                attempted,
                timed_out: matches!(outcome, GateOutcome::TimedOut),
            },
            created_at: Utc::now(),
        };
        if let Err(e) = self.audit.record(&record).await {
            tracing::error!(request_id = %request_id, error = %e, "failed to record gate audit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gk_mqtt_channel::MockChannel;
    use gk_protocol::CommandMessage;

    use crate::error::{ApiError, ApiResult};

    const CMD_TOPIC: &str = "pgr/mitspe6/gate/cmd";

    struct Fixture {
        engine: Arc<GateEngine>,
        mock: Arc<MockChannel>,
        audit: Arc<MemoryAuditRecorder>,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let mock = Arc::new(MockChannel::new());
        let audit = Arc::new(MemoryAuditRecorder::new());
        let channel: Arc<dyn Channel> = mock.clone();
        let engine = Arc::new(GateEngine::new(
            config,
            Some(channel),
            TopicSet::default(),
            audit.clone(),
        ));
        Fixture { engine, mock, audit }
    }

    fn ctx(user_id: &str) -> AttemptContext {
        AttemptContext {
            user_id: user_id.into(),
            device_id: format!("{user_id}-phone"),
            ip: Some("198.51.100.4".into()),
            user_agent: Some("test-agent".into()),
            ..Default::default()
        }
    }

    fn auto_ack(fx: &Fixture) {
        let mut rx = fx.mock.listen();
        let engine = Arc::clone(&fx.engine);
        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                let cmd: CommandMessage = serde_json::from_slice(&msg.payload).unwrap();
                engine.handle_ack(AckMessage::success(cmd.request_id));
            }
        });
    }

    struct FailingRecorder;

    #[async_trait]
    impl AuditRecorder for FailingRecorder {
        async fn record(&self, _record: &AuditRecord) -> ApiResult<()> {
            Err(ApiError::Internal("disk full".into()))
        }

        async fn recent(&self, _limit: usize) -> ApiResult<Vec<AuditRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn opened_attempt_is_audited() {
        let fx = fixture(EngineConfig::default());
        auto_ack(&fx);

        let result = fx.engine.open_gate(ctx("u1")).await;
        assert_eq!(result.outcome, GateOutcome::Opened);
        assert!(!result.replayed);
        assert!(result.device.is_none());

        let records = fx.audit.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, OutcomeKind::Opened);
        assert_eq!(records[0].request_id, result.request_id);
        assert_eq!(records[0].ip.as_deref(), Some("198.51.100.4"));
        assert!(records[0].transport.attempted);
    }

    #[tokio::test]
    async fn replay_returns_cached_outcome_without_publishing() {
        let fx = fixture(EngineConfig::default());
        auto_ack(&fx);
        let id = Uuid::now_v7();

        let first = fx
            .engine
            .open_gate(AttemptContext {
                request_id: Some(id),
                ..ctx("u1")
            })
            .await;
        let second = fx
            .engine
            .open_gate(AttemptContext {
                request_id: Some(id),
                ..ctx("u1")
            })
            .await;

        assert_eq!(first.outcome, GateOutcome::Opened);
        assert_eq!(second.outcome, GateOutcome::Opened);
        assert!(second.replayed);
        assert_eq!(fx.mock.published_to(CMD_TOPIC).len(), 1);
        assert_eq!(fx.audit.len().await, 1);
    }

    #[tokio::test]
    async fn request_id_of_another_user_conflicts() {
        let fx = fixture(EngineConfig::default());
        auto_ack(&fx);
        let id = Uuid::now_v7();

        fx.engine
            .open_gate(AttemptContext {
                request_id: Some(id),
                ..ctx("u1")
            })
            .await;
        let stolen = fx
            .engine
            .open_gate(AttemptContext {
                request_id: Some(id),
                ..ctx("u2")
            })
            .await;

        assert_eq!(stolen.outcome, GateOutcome::AlreadyInFlight);
        assert_eq!(fx.mock.published_to(CMD_TOPIC).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_attempt_is_rejected_without_publishing() {
        let fx = fixture(EngineConfig::default());
        let mut rx = fx.mock.listen();

        let engine = Arc::clone(&fx.engine);
        let first = tokio::spawn(async move { engine.open_gate(ctx("u1")).await });
        rx.recv().await.unwrap();

        let second = fx.engine.open_gate(ctx("u1")).await;
        assert_eq!(second.outcome, GateOutcome::AlreadyInFlight);
        assert_eq!(fx.mock.published_to(CMD_TOPIC).len(), 1);

        let first = first.await.unwrap();
        assert_eq!(first.outcome, GateOutcome::TimedOut);

        let outcomes: Vec<OutcomeKind> = fx.audit.all().await.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![OutcomeKind::AlreadyInFlight, OutcomeKind::TimedOut]
        );
    }

    #[tokio::test]
    async fn fourth_attempt_in_window_is_rate_limited() {
        let audit = Arc::new(MemoryAuditRecorder::new());
        let engine = GateEngine::new(
            EngineConfig {
                throttle: ThrottleConfig {
                    limit: 3,
                    window: Duration::from_secs(10),
                },
                ..Default::default()
            },
            None,
            TopicSet::default(),
            audit.clone(),
        );

        for _ in 0..3 {
            let result = engine.open_gate(ctx("u1")).await;
            assert!(matches!(result.outcome, GateOutcome::TransportUnavailable { .. }));
        }
        let fourth = engine.open_gate(ctx("u1")).await;
        assert!(matches!(fourth.outcome, GateOutcome::RateLimited { retry_after } if retry_after <= Duration::from_secs(10)));
        assert_eq!(audit.recent(1).await.unwrap()[0].outcome, OutcomeKind::RateLimited);
    }

    #[tokio::test]
    async fn broker_outage_releases_permit() {
        let fx = fixture(EngineConfig::default());
        fx.mock.set_connected(false);

        let failed = fx.engine.open_gate(ctx("u1")).await;
        assert!(matches!(failed.outcome, GateOutcome::TransportUnavailable { .. }));

        fx.mock.set_connected(true);
        auto_ack(&fx);
        let retried = fx.engine.open_gate(ctx("u1")).await;
        assert_eq!(retried.outcome, GateOutcome::Opened);
    }

    #[tokio::test]
    async fn audit_failure_does_not_change_outcome() {
        let mock = Arc::new(MockChannel::new());
        let channel: Arc<dyn Channel> = mock.clone();
        let engine = Arc::new(GateEngine::new(
            EngineConfig::default(),
            Some(channel),
            TopicSet::default(),
            Arc::new(FailingRecorder),
        ));

        let mut rx = mock.listen();
        let acker = Arc::clone(&engine);
        tokio::spawn(async move {
            let msg = rx.recv().await.unwrap();
            let cmd: CommandMessage = serde_json::from_slice(&msg.payload).unwrap();
            acker.handle_ack(AckMessage::failure(cmd.request_id, "SIM_FAIL"));
        });

        let result = engine.open_gate(ctx("u1")).await;
        assert_eq!(
            result.outcome,
            GateOutcome::DeviceRejected {
                error_code: Some("SIM_FAIL".into())
            }
        );
    }

    #[tokio::test]
    async fn outcome_annotated_with_gate_reachability() {
        let fx = fixture(EngineConfig {
            gate_device_id: Some("mitspe6-gate-001".into()),
            ..Default::default()
        });
        auto_ack(&fx);
        fx.engine.handle_status(StatusMessage {
            device_id: "mitspe6-gate-001".into(),
            online: true,
            updated_at: gk_protocol::now_millis(),
            rssi: None,
            fw_version: None,
        });

        let result = fx.engine.open_gate(ctx("u1")).await;
        assert_eq!(result.device, Some(Reachability::Online));
    }
}
