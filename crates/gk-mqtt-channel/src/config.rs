use serde::Deserialize;

use crate::error::{MqttError, MqttResult};

const DEFAULT_PLAIN_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// MQTT connection configuration, loadable from TOML or environment.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`.
    pub url: String,
    /// MQTT client ID (must be unique per connection).
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// CA bundle (PEM) used to verify the broker on `mqtts://`.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    /// Device certificate (PEM) for mutual TLS.
    #[serde(default)]
    pub client_cert_path: Option<String>,
    /// Device private key (PEM) for mutual TLS.
    #[serde(default)]
    pub client_key_path: Option<String>,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
}

fn default_keepalive() -> u16 {
    30
}

impl MqttConfig {
    /// Plaintext config with no credentials, mostly for tests and local runs.
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            username: None,
            password: None,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            keepalive_secs: default_keepalive(),
        }
    }
}

/// Where to connect, as parsed from [`MqttConfig::url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://host[:port]` / `mqtts://host[:port]`.
///
/// A bare `host[:port]` is treated as plaintext. Any other scheme is
/// rejected.
pub fn parse_broker_url(url: &str) -> MqttResult<BrokerAddress> {
    let url = url.trim();
    let (rest, tls) = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => (rest, false),
        Some(("mqtts" | "ssl", rest)) => (rest, true),
        Some((scheme, _)) => {
            return Err(MqttError::Config(format!(
                "unsupported scheme '{scheme}' in broker URL '{url}'"
            )));
        }
        None => (url, false),
    };

    // Ignore any path component.
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| MqttError::Config(format!("invalid port in broker URL '{url}'")))?;
            (host, port)
        }
        None if tls => (authority, DEFAULT_TLS_PORT),
        None => (authority, DEFAULT_PLAIN_PORT),
    };

    if host.is_empty() {
        return Err(MqttError::Config(format!("missing host in broker URL '{url}'")));
    }

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}
