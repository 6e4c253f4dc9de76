//! Shared application state for the Axum server and the MQTT bridge.
//!
//! Supports two modes:
//! - **Database mode**: `PgPool` for audit rows, status and diagnostics.
//! - **In-memory mode**: bounded in-process stores (tests and development).

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;

use gk_mqtt_channel::Channel;
use gk_protocol::{DiagnosticEntry, DiagnosticsMessage, TopicSet};

use crate::config::ApiConfig;
use crate::device_writer::{DeviceStore, DeviceWrite, DeviceWriter, PgDeviceStore};
use crate::engine::{AuditRecorder, GateEngine, MemoryAuditRecorder, PgAuditRecorder};

/// Diagnostics batches kept in memory when no database is configured.
pub const DIAGNOSTICS_CAPACITY: usize = 500;

/// One diagnostics batch as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsRecord {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fw_version: Option<String>,
    pub entries: Vec<DiagnosticEntry>,
    pub received_at: DateTime<Utc>,
}

impl DiagnosticsRecord {
    pub fn from_message(msg: DiagnosticsMessage, received_at: DateTime<Utc>) -> Self {
        Self {
            device_id: msg.device_id,
            session_id: msg.session_id,
            fw_version: msg.fw_version,
            entries: msg.entries,
            received_at,
        }
    }
}

/// Shared application state, cheap to clone into handlers.
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL connection pool (None in test/in-memory mode).
    pub pool: Option<PgPool>,
    pub engine: Arc<GateEngine>,
    pub topics: TopicSet,
    /// In-memory diagnostics ring (used when no writer is set), oldest first.
    pub diagnostics: Arc<RwLock<VecDeque<DiagnosticsRecord>>>,
    /// Queue to the background status/diagnostics writer.
    pub writer: Option<DeviceWriter>,
}

impl AppState {
    /// Build the engine and stores for `config`.
    ///
    /// `channel = None` runs with the transport unavailable. With a pool,
    /// this spawns the device writer and so needs a Tokio runtime.
    pub fn build(config: &ApiConfig, pool: Option<PgPool>, channel: Option<Arc<dyn Channel>>) -> Self {
        let audit: Arc<dyn AuditRecorder> = match &pool {
            Some(pool) => Arc::new(PgAuditRecorder::new(pool.clone())),
            None => Arc::new(MemoryAuditRecorder::new()),
        };
        let engine = GateEngine::new(
            config.engine_config(),
            channel,
            config.topics.clone(),
            audit,
        );
        let state = Self::with_engine(engine, config.topics.clone(), pool.clone());
        match pool {
            Some(pool) => state.with_device_store(Arc::new(PgDeviceStore::new(pool))),
            None => state,
        }
    }

    pub fn with_engine(engine: GateEngine, topics: TopicSet, pool: Option<PgPool>) -> Self {
        Self {
            pool,
            engine: Arc::new(engine),
            topics,
            diagnostics: Arc::new(RwLock::new(VecDeque::new())),
            writer: None,
        }
    }

    /// Persist status and diagnostics through `store` on a background task.
    pub fn with_device_store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.writer = Some(DeviceWriter::spawn(store));
        self
    }

    /// In-memory state with default config and no transport.
    pub fn new() -> Self {
        Self::build(&ApiConfig::default(), None, None)
    }

    /// Queue a diagnostics batch for the writer, or keep it in the ring.
    pub async fn store_diagnostics(&self, record: DiagnosticsRecord) {
        if let Some(writer) = &self.writer {
            writer.submit(DeviceWrite::Diagnostics(record));
            return;
        }
        let mut ring = self.diagnostics.write().await;
        if ring.len() == DIAGNOSTICS_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(record);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(device_id: &str) -> DiagnosticsRecord {
        DiagnosticsRecord {
            device_id: device_id.into(),
            session_id: None,
            fw_version: None,
            entries: Vec::new(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn diagnostics_ring_is_bounded() {
        let state = AppState::new();
        for i in 0..DIAGNOSTICS_CAPACITY + 3 {
            state.store_diagnostics(record(&format!("gate-{i}"))).await;
        }
        let ring = state.diagnostics.read().await;
        assert_eq!(ring.len(), DIAGNOSTICS_CAPACITY);
        assert_eq!(ring.front().unwrap().device_id, "gate-3");
    }

    #[test]
    fn default_state_has_no_transport() {
        let state = AppState::new();
        assert!(!state.engine.has_transport());
        assert!(state.pool.is_none());
        assert!(state.writer.is_none());
    }
}
