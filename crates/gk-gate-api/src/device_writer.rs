//! Background persistence for controller status and diagnostics.
//!
//! The MQTT bridge hands writes to a bounded queue and never awaits the
//! store, so a slow database cannot hold up ack delivery on the poll task.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use gk_protocol::StatusMessage;

use crate::error::ApiResult;
use crate::state::DiagnosticsRecord;

/// Writes buffered before new ones are dropped.
pub const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum DeviceWrite {
    Status {
        status: StatusMessage,
        received_at: DateTime<Utc>,
    },
    Diagnostics(DiagnosticsRecord),
}

impl DeviceWrite {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceWrite::Status { status, .. } => &status.device_id,
            DeviceWrite::Diagnostics(record) => &record.device_id,
        }
    }
}

/// Where device writes end up.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn write(&self, write: &DeviceWrite) -> ApiResult<()>;
}

pub struct PgDeviceStore {
    pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn write(&self, write: &DeviceWrite) -> ApiResult<()> {
        match write {
            DeviceWrite::Status {
                status,
                received_at,
            } => crate::db::device_status::upsert(&self.pool, status, *received_at).await?,
            DeviceWrite::Diagnostics(record) => {
                crate::db::diagnostics::insert(&self.pool, record).await?
            }
        }
        Ok(())
    }
}

/// Sending half of the write queue. Cheap to clone.
#[derive(Clone)]
pub struct DeviceWriter {
    tx: mpsc::Sender<DeviceWrite>,
}

impl DeviceWriter {
    /// Start the writer task draining into `store`. Needs a Tokio runtime.
    pub fn spawn(store: Arc<dyn DeviceStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<DeviceWrite>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) = store.write(&write).await {
                    tracing::error!(error = %e, device_id = %write.device_id(), "failed to persist device write");
                }
            }
            tracing::debug!("device writer stopped");
        });
        Self { tx }
    }

    /// Queue a write without waiting. Drops it if the queue is full.
    pub fn submit(&self, write: DeviceWrite) {
        match self.tx.try_send(write) {
            Ok(()) => {}
            Err(TrySendError::Full(write)) => {
                tracing::warn!(device_id = %write.device_id(), "device write queue full, dropping write");
            }
            Err(TrySendError::Closed(write)) => {
                tracing::error!(device_id = %write.device_id(), "device writer stopped, dropping write");
            }
        }
    }
}
