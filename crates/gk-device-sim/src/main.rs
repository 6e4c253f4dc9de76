//! Gate controller simulator: stands in for the relay board during
//! development and end-to-end runs.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use gk_device_sim::config::SimConfig;
use gk_device_sim::device::SimDevice;
use gk_device_sim::{heartbeat, mqtt_loop};
use gk_mqtt_channel::{Channel, MqttChannel, QoS, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gk-device-sim starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/gatekeeper/device-sim.toml".to_string());

    let config = SimConfig::from_file(&config_path)?;
    tracing::info!(
        device_id = %config.device_id,
        ack_mode = ?config.ack_mode,
        ack_delay_ms = config.ack_delay_ms,
        cooldown_ms = config.cooldown_ms,
        "config loaded"
    );

    let (channel, eventloop) = MqttChannel::connect(&config.mqtt)?;
    let channel = Arc::new(channel);
    channel.subscribe(&config.topics.command, QoS::AtLeastOnce).await?;
    tracing::info!(topic = %config.topics.command, "subscribed to commands");

    let device = Arc::new(SimDevice::new(
        &config,
        Arc::clone(&channel) as Arc<dyn Channel>,
    ));
    let session = Session::new(eventloop, Arc::clone(&channel));

    tokio::select! {
        () = mqtt_loop::run(session, Arc::clone(&device)) => {
            tracing::error!("MQTT loop exited unexpectedly");
        }
        () = heartbeat::run(&device, config.status_interval()) => {
            tracing::error!("heartbeat loop exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Err(e) = channel.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    tracing::info!("gk-device-sim stopped");
    Ok(())
}
