use serde::{Deserialize, Serialize};

/// Status topic payload: `{deviceId, online, updatedAt, rssi?, fwVersion?}`.
///
/// Gate controllers publish this on a fixed interval, independent of
/// command traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub device_id: String,
    pub online: bool,
    /// Unix epoch milliseconds on the controller clock.
    pub updated_at: i64,
    /// Cellular signal strength in dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_version: Option<String>,
}

/// Diagnostics topic payload, sent by a controller after it reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsMessage {
    pub device_id: String,
    #[serde(default)]
    pub entries: Vec<DiagnosticEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A single event from the controller's local ring log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    /// Unix epoch milliseconds.
    pub ts: i64,
    /// "info", "warn" or "error".
    pub level: String,
    /// Machine-readable event name, e.g. "connection_lost".
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
