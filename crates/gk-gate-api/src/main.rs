//! Gate backend: open-gate REST API plus the MQTT bridge to the gate
//! controller.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use gk_gate_api::config::ApiConfig;
use gk_gate_api::state::AppState;
use gk_gate_api::{db, mqtt_bridge, routes};
use gk_mqtt_channel::{Channel, MqttChannel, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gk-gate-api starting");

    let config = ApiConfig::from_env();

    let pool = match &config.database_url {
        Some(database_url) => {
            tracing::info!("connecting to PostgreSQL");
            Some(db::connect(database_url).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            None
        }
    };

    // A broken broker config is not fatal: attempts resolve `unavailable`.
    let transport = match &config.mqtt {
        Some(mqtt) => match MqttChannel::connect(mqtt) {
            Ok((channel, eventloop)) => {
                tracing::info!(url = %mqtt.url, client_id = %mqtt.client_id, "mqtt client configured");
                Some((Arc::new(channel), eventloop))
            }
            Err(e) => {
                tracing::error!(error = %e, "invalid mqtt configuration, running without transport");
                None
            }
        },
        None => {
            tracing::warn!("MQTT_URL not set, gate commands will be unavailable");
            None
        }
    };

    let channel = transport
        .as_ref()
        .map(|(channel, _)| Arc::clone(channel) as Arc<dyn Channel>);
    let state = AppState::build(&config, pool, channel);

    if let Some((channel, eventloop)) = transport {
        mqtt_bridge::subscribe_all(channel.as_ref(), &state.topics).await?;
        let session = Session::new(eventloop, channel);
        tokio::spawn(mqtt_bridge::run(session, state.clone()));
    }

    let app = routes::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("shutting down");
    })
    .await?;

    Ok(())
}
