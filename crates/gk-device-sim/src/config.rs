//! Simulator configuration, loaded from TOML.

use std::time::Duration;

use serde::Deserialize;

use gk_mqtt_channel::MqttConfig;
use gk_protocol::TopicSet;

/// How the simulated controller answers commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// Ack `ok = true` after the base delay.
    #[default]
    Success,
    /// Ack `ok = false` with `SIM_FAIL`.
    Fail,
    /// Never ack.
    Timeout,
    /// Ack `ok = true` after a random 100–6000 ms.
    Jitter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicSet,
    #[serde(default)]
    pub ack_mode: AckMode,
    #[serde(default = "default_ack_delay_ms")]
    pub ack_delay_ms: u64,
    /// Minimum gap between two physical opens.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default = "default_fw_version")]
    pub fw_version: String,
    #[serde(default = "default_rssi")]
    pub rssi: Option<i32>,
    /// Publish a diagnostics batch on every (re)connect.
    #[serde(default)]
    pub diagnostics_on_reconnect: bool,
    /// Defaults to `sim-<uuid>` when unset.
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_device_id() -> String {
    "mitspe6-gate-001".to_string()
}

fn default_ack_delay_ms() -> u64 {
    100
}

fn default_cooldown_ms() -> u64 {
    3000
}

fn default_status_interval_ms() -> u64 {
    5000
}

fn default_fw_version() -> String {
    "sim-0.1.0".to_string()
}

fn default_rssi() -> Option<i32> {
    Some(-65)
}

impl SimConfig {
    /// Defaults for everything but identity and broker.
    pub fn for_device(device_id: impl Into<String>, mqtt: MqttConfig) -> Self {
        Self {
            device_id: device_id.into(),
            mqtt,
            topics: TopicSet::default(),
            ack_mode: AckMode::default(),
            ack_delay_ms: default_ack_delay_ms(),
            cooldown_ms: default_cooldown_ms(),
            status_interval_ms: default_status_interval_ms(),
            fw_version: default_fw_version(),
            rssi: default_rssi(),
            diagnostics_on_reconnect: false,
            session_id: None,
        }
    }

    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn ack_delay(&self) -> Duration {
        Duration::from_millis(self.ack_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn session_id(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| format!("sim-{}", uuid::Uuid::now_v7().simple()))
    }
}
