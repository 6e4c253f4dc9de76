//! MQTT transport for the gate system.
//!
//! - `Channel` trait for publish/subscribe (mockable in tests)
//! - `MqttChannel` over `rumqttc`, plaintext or TLS, with durable subscriptions
//! - `Session` drives the event loop with exponential reconnect backoff
//! - `MockChannel` for testing without a broker
//! - `IncomingMessage` classification for the gate topics

pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod mock;
pub mod session;
pub mod tls;

// Re-exports for convenience.
pub use backoff::Backoff;
pub use channel::{Channel, MqttChannel, publish_json};
pub use config::{BrokerAddress, MqttConfig, parse_broker_url};
pub use error::{MqttError, MqttResult};
pub use handler::{IncomingMessage, classify, classify_payload};
pub use mock::{MockChannel, PublishedMessage};
pub use rumqttc::QoS;
pub use session::{Session, SessionEvent};
