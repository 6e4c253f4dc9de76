//! Mock MQTT channel for testing without a real broker.
//!
//! Records published messages and subscription filters, fans every
//! publish out to live listeners, and can be disconnected from its
//! pretend broker, failing publishes the way `MqttChannel` does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::broadcast;

use crate::channel::Channel;
use crate::error::{MqttError, MqttResult};

/// One publish as seen by the mock.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// In-memory stand-in for a broker connection.
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    connected: AtomicBool,
    live: broadcast::Sender<PublishedMessage>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockChannel {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(256);
        Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            live,
        }
    }

    /// Every successful publish, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        locked(&self.published).clone()
    }

    /// Filters passed to `subscribe`, in call order.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        locked(&self.subscriptions).clone()
    }

    /// Most recent successful publish.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        locked(&self.published).last().cloned()
    }

    /// Publishes whose topic equals `topic` exactly.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        locked(&self.published)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Whether `filter` was subscribed at any point.
    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        locked(&self.subscriptions).iter().any(|(f, _)| f == filter)
    }

    /// Receive every message published from now on.
    pub fn listen(&self) -> broadcast::Receiver<PublishedMessage> {
        self.live.subscribe()
    }

    /// Simulate losing (or regaining) the broker connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Forget recorded publishes and subscriptions; listeners stay attached.
    pub fn reset(&self) {
        locked(&self.published).clear();
        locked(&self.subscriptions).clear();
        self.set_connected(true);
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        if !self.is_connected() {
            return Err(MqttError::Publish(format!("{topic}: not connected to broker")));
        }
        let msg = PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        };
        locked(&self.published).push(msg.clone());
        // No listeners is fine.
        let _ = self.live.send(msg);
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        locked(&self.subscriptions).push((filter.to_string(), qos));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_records_messages() {
        let mock = MockChannel::new();
        mock.publish("gate/cmd", b"hello", QoS::AtLeastOnce)
            .await
            .unwrap();
        mock.publish("gate/ack", b"world", QoS::AtMostOnce)
            .await
            .unwrap();

        let msgs = mock.published();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].topic, "gate/cmd");
        assert_eq!(msgs[0].payload, b"hello");
        assert_eq!(msgs[1].topic, "gate/ack");
        assert_eq!(mock.published_to("gate/cmd").len(), 1);
    }

    #[tokio::test]
    async fn subscribe_records_filters() {
        let mock = MockChannel::new();
        mock.subscribe("pgr/mitspe6/gate/ack", QoS::AtLeastOnce)
            .await
            .unwrap();

        assert!(mock.is_subscribed_to("pgr/mitspe6/gate/ack"));
        assert!(!mock.is_subscribed_to("pgr/mitspe6/gate/status"));
    }

    #[tokio::test]
    async fn listeners_see_publishes() {
        let mock = MockChannel::new();
        let mut rx = mock.listen();
        mock.publish("t", b"1", QoS::AtLeastOnce).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "t");
    }

    #[tokio::test]
    async fn disconnected_publish_is_not_recorded() {
        let mock = MockChannel::new();
        mock.set_connected(false);
        let err = mock.publish("t", b"1", QoS::AtLeastOnce).await.unwrap_err();
        assert!(matches!(err, MqttError::Publish(_)));
        assert!(mock.last_published().is_none());

        mock.set_connected(true);
        mock.publish("t", b"2", QoS::AtLeastOnce).await.unwrap();
        assert_eq!(mock.published().len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_state() {
        let mock = MockChannel::new();
        mock.publish("t", b"d", QoS::AtMostOnce).await.unwrap();
        mock.subscribe("f", QoS::AtLeastOnce).await.unwrap();
        mock.set_connected(false);

        mock.reset();
        assert!(mock.published().is_empty());
        assert!(mock.subscriptions().is_empty());
        assert!(mock.publish("t", b"d", QoS::AtMostOnce).await.is_ok());
    }
}
