//! Gate backend configuration, read from environment variables.

use std::str::FromStr;
use std::time::Duration;

use gk_mqtt_channel::MqttConfig;
use gk_protocol::TopicSet;
use serde::Deserialize;

use crate::engine::{EngineConfig, ThrottleConfig};

/// Top-level API server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Listen address (e.g., "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// PostgreSQL connection URL. Unset → in-memory stores.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Broker connection. Unset → every attempt is `unavailable`.
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub topics: TopicSet,
    /// Ack deadline.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
    /// Expected controller status interval.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub gate_device_id: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_ack_timeout_ms() -> u64 {
    2500
}

fn default_rate_limit() -> u32 {
    6
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_idempotency_ttl_secs() -> u64 {
    30
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

impl ApiConfig {
    /// Load config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup (environment, test map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let mqtt = var("MQTT_URL").map(|url| {
            let client_id = var("MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("gk-gate-api-{}", uuid::Uuid::now_v7().simple()));
            MqttConfig {
                username: var("MQTT_USERNAME"),
                password: var("MQTT_PASSWORD"),
                ca_cert_path: var("MQTT_CA_CERT_PATH"),
                client_cert_path: var("MQTT_CLIENT_CERT_PATH"),
                client_key_path: var("MQTT_CLIENT_KEY_PATH"),
                ..MqttConfig::new(url, client_id)
            }
        });

        let topics = TopicSet {
            command: var("MQTT_CMD_TOPIC").unwrap_or(defaults.topics.command),
            ack: var("MQTT_ACK_TOPIC").unwrap_or(defaults.topics.ack),
            status: var("MQTT_STATUS_TOPIC").unwrap_or(defaults.topics.status),
            diagnostics: var("MQTT_DIAGNOSTICS_TOPIC").unwrap_or(defaults.topics.diagnostics),
        };

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_or(&var, "PORT", defaults.port),
            database_url: var("DATABASE_URL"),
            mqtt,
            topics,
            ack_timeout_ms: parse_or(&var, "MCU_TIMEOUT_MS", defaults.ack_timeout_ms),
            rate_limit: parse_or(&var, "GATE_RATE_LIMIT_PER_MINUTE", defaults.rate_limit),
            rate_window_secs: parse_or(&var, "GATE_RATE_LIMIT_WINDOW_SECS", defaults.rate_window_secs),
            idempotency_ttl_secs: parse_or(
                &var,
                "GATE_IDEMPOTENCY_TTL_SECS",
                defaults.idempotency_ttl_secs,
            ),
            heartbeat_interval_secs: parse_or(
                &var,
                "DEVICE_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            ),
            gate_device_id: var("GATE_DEVICE_ID"),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            throttle: ThrottleConfig {
                limit: self.rate_limit,
                window: Duration::from_secs(self.rate_window_secs),
            },
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            gate_device_id: self.gate_device_id.clone(),
        }
    }
}

/// Parse `key`, warning and falling back to `default` on garbage. Zero is
/// rejected too: none of the numeric settings mean anything at zero.
fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialEq + Default + Copy + std::fmt::Display,
{
    let Some(raw) = var(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => {
            tracing::warn!(key, value = %raw, default = %default, "invalid config value, using default");
            default
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: None,
            mqtt: None,
            topics: TopicSet::default(),
            ack_timeout_ms: default_ack_timeout_ms(),
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window_secs(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            gate_device_id: None,
        }
    }
}
