//! Append-only audit trail of resolved attempts.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::outcome::OutcomeKind;
use crate::error::ApiResult;

/// In-memory audit rows kept when no database is configured.
const MEMORY_CAPACITY: usize = 1000;

/// One row per resolved attempt, guard rejections included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub user_id: String,
    /// Caller's session device.
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub outcome: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub duration_ms: i64,
    pub transport: TransportTrace,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportTrace {
    /// A publish was attempted.
    pub attempted: bool,
    pub timed_out: bool,
}

#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> ApiResult<()>;

    /// Most recent records first.
    async fn recent(&self, limit: usize) -> ApiResult<Vec<AuditRecord>>;
}

/// Bounded ring used in development and tests.
pub struct MemoryAuditRecorder {
    records: RwLock<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl MemoryAuditRecorder {
    pub fn new() -> Self {
        Self::with_capacity(MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn all(&self) -> Vec<AuditRecord> {
        self.records.read().await.iter().cloned().collect()
    }
}

impl Default for MemoryAuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn record(&self, record: &AuditRecord) -> ApiResult<()> {
        let mut records = self.records.write().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> ApiResult<Vec<AuditRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

/// Writes to the `gate_logs` table.
pub struct PgAuditRecorder {
    pool: PgPool,
}

impl PgAuditRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRecorder for PgAuditRecorder {
    async fn record(&self, record: &AuditRecord) -> ApiResult<()> {
        crate::db::gate_logs::insert(&self.pool, record).await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> ApiResult<Vec<AuditRecord>> {
        let rows = crate::db::gate_logs::list_recent(&self.pool, limit as i64).await?;
        Ok(rows.into_iter().filter_map(|row| row.into_record()).collect())
    }
}
