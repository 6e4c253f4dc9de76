//! Audit rows for open-gate attempts.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::engine::{AuditRecord, OutcomeKind, TransportTrace};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GateLogRow {
    pub id: i64,
    pub request_id: Uuid,
    pub user_id: String,
    pub device_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: String,
    pub error_code: Option<String>,
    pub duration_ms: i64,
    pub transport_attempted: bool,
    pub transport_timed_out: bool,
    pub created_at: DateTime<Utc>,
}

impl GateLogRow {
    /// `None` if the stored outcome label is not one this build knows.
    pub fn into_record(self) -> Option<AuditRecord> {
        let outcome = match self.outcome.parse::<OutcomeKind>() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(id = self.id, error = %e, "skipping gate log row");
                return None;
            }
        };
        Some(AuditRecord {
            request_id: self.request_id,
            user_id: self.user_id,
            device_id: self.device_id,
            ip: self.ip,
            user_agent: self.user_agent,
            outcome,
            error_code: self.error_code,
            duration_ms: self.duration_ms,
            transport: TransportTrace {
                attempted: self.transport_attempted,
                timed_out: self.transport_timed_out,
            },
            created_at: self.created_at,
        })
    }
}

pub async fn insert(pool: &PgPool, record: &AuditRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO gate_logs (request_id, user_id, device_id, ip, user_agent, outcome, error_code,
                                duration_ms, transport_attempted, transport_timed_out, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(record.request_id)
    .bind(&record.user_id)
    .bind(&record.device_id)
    .bind(&record.ip)
    .bind(&record.user_agent)
    .bind(record.outcome.as_str())
    .bind(&record.error_code)
    .bind(record.duration_ms)
    .bind(record.transport.attempted)
    .bind(record.transport.timed_out)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent attempts first.
pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<GateLogRow>, sqlx::Error> {
    sqlx::query_as::<_, GateLogRow>("SELECT * FROM gate_logs ORDER BY created_at DESC, id DESC LIMIT $1")
        .bind(limit)
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(outcome: &str) -> GateLogRow {
        GateLogRow {
            id: 7,
            request_id: Uuid::now_v7(),
            user_id: "u1".into(),
            device_id: "phone-1".into(),
            ip: None,
            user_agent: None,
            outcome: outcome.into(),
            error_code: Some("SIM_FAIL".into()),
            duration_ms: 80,
            transport_attempted: true,
            transport_timed_out: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn row_maps_to_record() {
        let record = row("device_rejected").into_record().unwrap();
        assert_eq!(record.outcome, OutcomeKind::DeviceRejected);
        assert_eq!(record.error_code.as_deref(), Some("SIM_FAIL"));
        assert!(record.transport.attempted);
    }

    #[test]
    fn unknown_outcome_is_skipped() {
        assert!(row("exploded").into_record().is_none());
    }
}
