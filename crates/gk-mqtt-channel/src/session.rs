//! Event loop driver with reconnect backoff and durable subscriptions.

use std::sync::Arc;

use rumqttc::{Event, EventLoop, Packet, Publish};
use tracing::{debug, error, info};

use crate::backoff::Backoff;
use crate::channel::MqttChannel;

/// What the caller needs to react to.
#[derive(Debug)]
pub enum SessionEvent {
    /// Broker accepted the connection; subscriptions have been re-issued.
    Connected { session_present: bool },
    /// An established connection was lost. Reported once per outage.
    Disconnected { error: String },
    /// Inbound publish on a subscribed topic.
    Message(Publish),
}

/// Owns the `EventLoop` for one [`MqttChannel`].
///
/// `rumqttc` reconnects on the next poll after an error; the session only
/// spaces those polls out with [`Backoff`] and restores subscriptions on
/// every `ConnAck`. It also keeps the channel's connected flag current, so
/// publishes fail fast during an outage and its backoff sleep.
pub struct Session {
    eventloop: EventLoop,
    channel: Arc<MqttChannel>,
    backoff: Backoff,
}

impl Session {
    pub fn new(eventloop: EventLoop, channel: Arc<MqttChannel>) -> Self {
        Self::with_backoff(eventloop, channel, Backoff::default())
    }

    pub fn with_backoff(eventloop: EventLoop, channel: Arc<MqttChannel>, backoff: Backoff) -> Self {
        Self {
            eventloop,
            channel,
            backoff,
        }
    }

    /// Poll until something the caller cares about happens.
    pub async fn next(&mut self) -> SessionEvent {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.backoff.reset();
                    self.channel.set_connected(true);
                    info!(
                        code = ?ack.code,
                        session_present = ack.session_present,
                        "connected to MQTT broker"
                    );
                    if let Err(e) = self.channel.resubscribe_all() {
                        error!(error = %e, "failed to restore subscriptions");
                    }
                    return SessionEvent::Connected {
                        session_present: ack.session_present,
                    };
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return SessionEvent::Message(publish);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, "subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    error!(
                        error = %e,
                        attempt = self.backoff.attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        "MQTT connection error"
                    );
                    let was_connected = self.channel.set_connected(false);
                    tokio::time::sleep(delay).await;
                    if was_connected {
                        return SessionEvent::Disconnected {
                            error: e.to_string(),
                        };
                    }
                }
            }
        }
    }
}
