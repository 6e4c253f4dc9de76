//! TLS transport for `mqtts://` brokers.
//!
//! Loads the CA bundle and, when both are configured, the client
//! certificate and key for mutual TLS.

use rumqttc::{TlsConfiguration, Transport};

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};

/// Build a TLS transport from the PEM file paths in the config.
pub fn load_tls_transport(config: &MqttConfig) -> MqttResult<Transport> {
    let ca_path = config
        .ca_cert_path
        .as_deref()
        .ok_or_else(|| MqttError::Tls("mqtts:// requires a CA cert path".into()))?;
    let ca = read_pem(ca_path, "CA cert")?;

    let client_auth = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert), Some(key)) => Some((read_pem(cert, "client cert")?, read_pem(key, "client key")?)),
        (None, None) => None,
        _ => {
            return Err(MqttError::Tls(
                "client cert and client key must be configured together".into(),
            ));
        }
    };

    Ok(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}

fn read_pem(path: &str, what: &str) -> MqttResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| MqttError::Tls(format!("failed to read {what} '{path}': {e}")))
}
