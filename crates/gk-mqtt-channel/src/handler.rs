//! Incoming message classification for the MQTT event loop.
//!
//! Parses raw publishes on the gate topics into typed `IncomingMessage`
//! variants so callers can dispatch without topic string matching.

use rumqttc::Publish;

use gk_protocol::{AckMessage, CommandMessage, DiagnosticsMessage, StatusMessage};
use gk_protocol::{TopicKind, TopicSet};

/// A classified incoming MQTT message.
#[derive(Debug)]
pub enum IncomingMessage {
    /// Command for a gate controller.
    Command(CommandMessage),
    /// Controller reply to a command.
    Ack(AckMessage),
    /// Controller heartbeat.
    Status(StatusMessage),
    /// Controller ring-log dump after a reconnect.
    Diagnostics(DiagnosticsMessage),
    /// Known topic, payload did not parse.
    Malformed { topic: String, error: String },
    /// Topic outside the configured set.
    Unknown { topic: String, payload: Vec<u8> },
}

/// Classify a raw MQTT publish into a typed message.
pub fn classify(topics: &TopicSet, publish: &Publish) -> IncomingMessage {
    classify_payload(topics, &publish.topic, &publish.payload)
}

/// Classify a topic/payload pair.
pub fn classify_payload(topics: &TopicSet, topic: &str, payload: &[u8]) -> IncomingMessage {
    let Some(kind) = topics.kind(topic) else {
        return IncomingMessage::Unknown {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
    };

    let parsed = match kind {
        TopicKind::Command => serde_json::from_slice(payload).map(IncomingMessage::Command),
        TopicKind::Ack => serde_json::from_slice(payload).map(IncomingMessage::Ack),
        TopicKind::Status => serde_json::from_slice(payload).map(IncomingMessage::Status),
        TopicKind::Diagnostics => serde_json::from_slice(payload).map(IncomingMessage::Diagnostics),
    };

    parsed.unwrap_or_else(|e| IncomingMessage::Malformed {
        topic: topic.to_string(),
        error: e.to_string(),
    })
}
