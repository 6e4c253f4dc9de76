//! Diagnostics batches from gate controllers.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use gk_protocol::DiagnosticEntry;

use crate::state::DiagnosticsRecord;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DiagnosticsRow {
    pub id: i64,
    pub device_id: String,
    pub session_id: Option<String>,
    pub fw_version: Option<String>,
    pub entries: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl DiagnosticsRow {
    pub fn into_record(self) -> DiagnosticsRecord {
        let entries: Vec<DiagnosticEntry> = serde_json::from_value(self.entries).unwrap_or_else(|e| {
            tracing::warn!(id = self.id, error = %e, "unreadable diagnostics entries");
            Vec::new()
        });
        DiagnosticsRecord {
            device_id: self.device_id,
            session_id: self.session_id,
            fw_version: self.fw_version,
            entries,
            received_at: self.received_at,
        }
    }
}

pub async fn insert(pool: &PgPool, record: &DiagnosticsRecord) -> Result<(), sqlx::Error> {
    let entries = serde_json::to_value(&record.entries).unwrap_or_default();
    sqlx::query(
        "INSERT INTO device_diagnostics (device_id, session_id, fw_version, entries, received_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&record.device_id)
    .bind(&record.session_id)
    .bind(&record.fw_version)
    .bind(entries)
    .bind(record.received_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest batches first.
pub async fn list(
    pool: &PgPool,
    device_id: &str,
    limit: i64,
    skip: i64,
) -> Result<Vec<DiagnosticsRow>, sqlx::Error> {
    sqlx::query_as::<_, DiagnosticsRow>(
        "SELECT * FROM device_diagnostics WHERE device_id = $1
         ORDER BY received_at DESC, id DESC LIMIT $2 OFFSET $3",
    )
    .bind(device_id)
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await
}
