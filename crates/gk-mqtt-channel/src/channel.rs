//! MQTT channel: async client for the gate topics.
//!
//! Wraps `rumqttc::AsyncClient`. Subscriptions are remembered so they can
//! be re-issued after every reconnect. Publishes fail immediately while the
//! broker connection is down instead of queueing for a later reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{MqttConfig, parse_broker_url};
use crate::error::{MqttError, MqttResult};
use crate::tls;

/// Requests `rumqttc` buffers between the client and the event loop.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for MQTT message publishing and subscribing.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload to a topic (never retained).
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()>;

    /// Subscribe to a topic filter for the lifetime of the process.
    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()>;
}

/// Serialize `payload` as JSON and publish it with QoS 1.
pub async fn publish_json<C, T>(channel: &C, topic: &str, payload: &T) -> MqttResult<()>
where
    C: Channel + ?Sized,
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(payload).map_err(|e| MqttError::Serialization(e.to_string()))?;
    channel.publish(topic, &bytes, QoS::AtLeastOnce).await
}

// ── MqttChannel ───────────────────────────────────────────────

/// MQTT channel connected to a broker.
///
/// Owns the `AsyncClient`. The `EventLoop` is returned separately from
/// `connect()` and must be driven by the caller, usually through
/// [`crate::Session`], which also maintains the connected flag.
pub struct MqttChannel {
    client: AsyncClient,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    connected: AtomicBool,
}

impl MqttChannel {
    /// Build a client from config. Plaintext or TLS follows the URL scheme.
    ///
    /// No network I/O happens until the event loop is polled.
    pub fn connect(config: &MqttConfig) -> MqttResult<(Self, EventLoop)> {
        let broker = parse_broker_url(&config.url)?;

        let mut options = MqttOptions::new(&config.client_id, &broker.host, broker.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs.into()));
        options.set_clean_session(true);

        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        if broker.tls {
            options.set_transport(tls::load_tls_transport(config)?);
        }

        info!(
            host = %broker.host,
            port = broker.port,
            tls = broker.tls,
            client_id = %config.client_id,
            "MQTT client configured"
        );

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let channel = Self {
            client,
            subscriptions: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
        };
        Ok((channel, eventloop))
    }

    /// Whether the broker has accepted the current connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Record the connection state. Returns the previous value.
    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::SeqCst)
    }

    /// Filters registered through [`Channel::subscribe`].
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-issue every durable subscription.
    ///
    /// Non-blocking, so it is safe to call from the task that polls the
    /// event loop (e.g. on `ConnAck`).
    pub fn resubscribe_all(&self) -> MqttResult<()> {
        for (filter, qos) in self.subscriptions() {
            self.client
                .try_subscribe(filter.as_str(), qos)
                .map_err(|e| MqttError::Subscribe(format!("{filter}: {e}")))?;
            debug!(%filter, "re-subscribed");
        }
        Ok(())
    }

    /// Send DISCONNECT to the broker.
    pub async fn disconnect(&self) -> MqttResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        if !self.is_connected() {
            return Err(MqttError::Publish(format!("{topic}: not connected to broker")));
        }
        // A full request queue means the event loop is not keeping up.
        self.client
            .try_publish(topic, qos, false, payload.to_vec())
            .map_err(|e| MqttError::Publish(format!("{topic}: {e}")))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))?;

        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !subs.iter().any(|(f, _)| f == filter) {
            subs.push((filter.to_string(), qos));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_rejects_unknown_scheme() {
        let config = MqttConfig::new("http://broker", "test");
        assert!(matches!(
            MqttChannel::connect(&config),
            Err(MqttError::Config(_))
        ));
    }

    #[test]
    fn connect_tls_without_ca_fails() {
        let config = MqttConfig::new("mqtts://broker", "test");
        assert!(matches!(MqttChannel::connect(&config), Err(MqttError::Tls(_))));
    }

    #[tokio::test]
    async fn subscriptions_are_remembered_once() {
        let config = MqttConfig::new("mqtt://localhost:1883", "test");
        let (channel, _eventloop) = MqttChannel::connect(&config).unwrap();

        channel.subscribe("a/ack", QoS::AtLeastOnce).await.unwrap();
        channel.subscribe("a/status", QoS::AtLeastOnce).await.unwrap();
        channel.subscribe("a/ack", QoS::AtLeastOnce).await.unwrap();

        let filters: Vec<String> = channel.subscriptions().into_iter().map(|(f, _)| f).collect();
        assert_eq!(filters, vec!["a/ack", "a/status"]);
        channel.resubscribe_all().unwrap();
    }

    #[tokio::test]
    async fn publish_before_connack_fails_fast() {
        let config = MqttConfig::new("mqtt://127.0.0.1:1", "test");
        let (channel, _eventloop) = MqttChannel::connect(&config).unwrap();
        assert!(!channel.is_connected());

        let err = channel
            .publish("gate/cmd", b"{}", QoS::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::Publish(_)));
    }

    #[tokio::test]
    async fn full_request_queue_fails_fast() {
        let config = MqttConfig::new("mqtt://127.0.0.1:1", "test");
        let (channel, _eventloop) = MqttChannel::connect(&config).unwrap();
        channel.set_connected(true);

        // Nobody polls the event loop, so the queue only fills up.
        for _ in 0..REQUEST_QUEUE_CAPACITY {
            channel
                .publish("gate/cmd", b"{}", QoS::AtLeastOnce)
                .await
                .unwrap();
        }
        let err = channel
            .publish("gate/cmd", b"{}", QoS::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::Publish(_)));
    }

    #[tokio::test]
    async fn publish_json_serializes_payload() {
        let mock = crate::mock::MockChannel::new();
        publish_json(&mock, "t", &serde_json::json!({"ok": true}))
            .await
            .unwrap();
        let msg = mock.last_published().unwrap();
        assert_eq!(msg.payload, br#"{"ok":true}"#);
        assert_eq!(msg.qos, QoS::AtLeastOnce);
    }
}
