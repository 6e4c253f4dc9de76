//! The simulated gate controller: answers commands and reports status
//! over whatever channel it is given.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use gk_mqtt_channel::{Channel, publish_json};
use gk_protocol::{CommandMessage, DiagnosticEntry, DiagnosticsMessage, StatusMessage, TopicSet, now_millis};

use crate::config::SimConfig;
use crate::responder::{Reply, Responder, ResponderConfig};

pub struct SimDevice {
    device_id: String,
    fw_version: String,
    rssi: Option<i32>,
    session_id: String,
    diagnostics_on_reconnect: bool,
    topics: TopicSet,
    channel: Arc<dyn Channel>,
    responder: Responder,
    /// Set when the connection drops, cleared once reported.
    connection_lost_at: Mutex<Option<i64>>,
}

impl SimDevice {
    pub fn new(config: &SimConfig, channel: Arc<dyn Channel>) -> Self {
        Self {
            device_id: config.device_id.clone(),
            fw_version: config.fw_version.clone(),
            rssi: config.rssi,
            session_id: config.session_id(),
            diagnostics_on_reconnect: config.diagnostics_on_reconnect,
            topics: config.topics.clone(),
            channel,
            responder: Responder::new(ResponderConfig::from(config)),
            connection_lost_at: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn status_message(&self) -> StatusMessage {
        StatusMessage {
            device_id: self.device_id.clone(),
            online: true,
            updated_at: now_millis(),
            rssi: self.rssi,
            fw_version: Some(self.fw_version.clone()),
        }
    }

    pub async fn publish_status(&self) {
        let status = self.status_message();
        match publish_json(self.channel.as_ref(), &self.topics.status, &status).await {
            Ok(()) => tracing::debug!(updated_at = status.updated_at, "status published"),
            Err(e) => tracing::warn!(error = %e, "failed to publish status"),
        }
    }

    /// Remember when the link went down. Repeated calls during one outage
    /// keep the first timestamp.
    pub fn on_disconnected(&self) {
        let mut lost = self
            .connection_lost_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lost.is_none() {
            *lost = Some(now_millis());
        }
    }

    /// Build the reconnect diagnostics batch and clear the outage marker.
    pub fn take_diagnostics(&self) -> DiagnosticsMessage {
        let lost_at = self
            .connection_lost_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut entries = Vec::with_capacity(2);
        if let Some(ts) = lost_at {
            entries.push(DiagnosticEntry {
                ts,
                level: "warn".into(),
                event: "connection_lost".into(),
                message: None,
            });
        }
        entries.push(DiagnosticEntry {
            ts: now_millis(),
            level: "info".into(),
            event: "connection_restored".into(),
            message: None,
        });

        DiagnosticsMessage {
            device_id: self.device_id.clone(),
            entries,
            fw_version: Some(self.fw_version.clone()),
            session_id: Some(self.session_id.clone()),
        }
    }

    /// Report diagnostics (if enabled) and an immediate status.
    pub async fn on_connected(&self) {
        if self.diagnostics_on_reconnect {
            let diagnostics = self.take_diagnostics();
            match publish_json(self.channel.as_ref(), &self.topics.diagnostics, &diagnostics).await
            {
                Ok(()) => tracing::info!(
                    entries = diagnostics.entries.len(),
                    "diagnostics published on reconnect"
                ),
                Err(e) => tracing::warn!(error = %e, "failed to publish diagnostics"),
            }
        }
        self.publish_status().await;
    }

    /// Handle one command-topic payload. The ack, if any, is published
    /// from a spawned task after the reply delay.
    pub fn handle_command(self: &Arc<Self>, payload: &[u8]) -> Option<JoinHandle<()>> {
        let cmd: CommandMessage = match serde_json::from_slice(payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable command");
                return None;
            }
        };
        tracing::info!(request_id = %cmd.request_id, user_id = %cmd.user_id, "command received");

        let Reply::Ack { ack, delay } = self.responder.respond(&cmd) else {
            return None;
        };

        let device = Arc::clone(self);
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match publish_json(device.channel.as_ref(), &device.topics.ack, &ack).await {
                Ok(()) => tracing::info!(request_id = %ack.request_id, ok = ack.ok, "ack published"),
                Err(e) => tracing::error!(request_id = %ack.request_id, error = %e, "failed to publish ack"),
            }
        }))
    }
}
