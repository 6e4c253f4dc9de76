//! Persisted controller heartbeats.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use gk_protocol::StatusMessage;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceStatusRow {
    pub device_id: String,
    pub online: bool,
    pub updated_at: i64,
    pub rssi: Option<i32>,
    pub fw_version: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl DeviceStatusRow {
    pub fn into_status(self) -> (StatusMessage, DateTime<Utc>) {
        (
            StatusMessage {
                device_id: self.device_id,
                online: self.online,
                updated_at: self.updated_at,
                rssi: self.rssi,
                fw_version: self.fw_version,
            },
            self.received_at,
        )
    }
}

/// Insert or replace, keeping only the newest `updated_at`.
pub async fn upsert(
    pool: &PgPool,
    status: &StatusMessage,
    received_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO device_status (device_id, online, updated_at, rssi, fw_version, received_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (device_id) DO UPDATE SET
            online = EXCLUDED.online,
            updated_at = EXCLUDED.updated_at,
            rssi = EXCLUDED.rssi,
            fw_version = EXCLUDED.fw_version,
            received_at = EXCLUDED.received_at
         WHERE device_status.updated_at < EXCLUDED.updated_at",
    )
    .bind(&status.device_id)
    .bind(status.online)
    .bind(status.updated_at)
    .bind(status.rssi)
    .bind(&status.fw_version)
    .bind(received_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &PgPool, device_id: &str) -> Result<Option<DeviceStatusRow>, sqlx::Error> {
    sqlx::query_as::<_, DeviceStatusRow>("SELECT * FROM device_status WHERE device_id = $1")
        .bind(device_id)
        .fetch_optional(pool)
        .await
}
