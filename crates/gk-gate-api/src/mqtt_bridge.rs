//! MQTT bridge: subscribes to controller topics and feeds acks, status
//! and diagnostics into the engine and stores.

use chrono::Utc;

use gk_mqtt_channel::{Channel, IncomingMessage, MqttResult, QoS, Session, SessionEvent, classify_payload};
use gk_protocol::TopicSet;

use crate::device_writer::DeviceWrite;
use crate::state::{AppState, DiagnosticsRecord};

/// Subscribe to every topic the backend consumes.
pub async fn subscribe_all(channel: &dyn Channel, topics: &TopicSet) -> MqttResult<()> {
    for topic in topics.backend_subscriptions() {
        channel.subscribe(topic, QoS::AtLeastOnce).await?;
        tracing::info!(topic, "subscribed");
    }
    Ok(())
}

/// Run the MQTT bridge event loop.
///
/// Drives the session (reconnects and resubscribes happen inside it) and
/// dispatches every inbound publish through `handle_incoming`.
pub async fn run(mut session: Session, state: AppState) {
    tracing::info!("mqtt bridge started");

    loop {
        match session.next().await {
            SessionEvent::Message(publish) => {
                handle_incoming(&publish.topic, &publish.payload, &state).await;
            }
            SessionEvent::Connected { session_present } => {
                tracing::info!(session_present, "mqtt bridge connected");
            }
            SessionEvent::Disconnected { error } => {
                tracing::warn!(error = %error, "mqtt bridge lost connection");
            }
        }
    }
}

/// Classify and handle an incoming MQTT publish. Never panics on bad input.
///
/// Runs on the poll task, so nothing here awaits a database round trip.
pub async fn handle_incoming(topic: &str, payload: &[u8], state: &AppState) {
    match classify_payload(&state.topics, topic, payload) {
        IncomingMessage::Ack(ack) => {
            state.engine.handle_ack(ack);
        }
        IncomingMessage::Status(status) => {
            let received_at = Utc::now();
            tracing::debug!(device_id = %status.device_id, online = status.online, "device status received");
            if !state.engine.handle_status(status.clone()) {
                tracing::debug!(device_id = %status.device_id, "ignoring out-of-order status");
                return;
            }
            if let Some(writer) = &state.writer {
                writer.submit(DeviceWrite::Status {
                    status,
                    received_at,
                });
            }
        }
        IncomingMessage::Diagnostics(diag) => {
            tracing::info!(
                device_id = %diag.device_id,
                entries = diag.entries.len(),
                "device diagnostics received"
            );
            state
                .store_diagnostics(DiagnosticsRecord::from_message(diag, Utc::now()))
                .await;
        }
        IncomingMessage::Command(_) => {
            // Our own publishes echoed back by a wildcard subscription.
            tracing::debug!(topic, "ignoring command topic message");
        }
        IncomingMessage::Malformed { topic, error } => {
            tracing::warn!(topic = %topic, error = %error, "dropping malformed mqtt payload");
        }
        IncomingMessage::Unknown { topic, .. } => {
            tracing::debug!(topic = %topic, "ignoring unknown mqtt topic");
        }
    }
}
