//! API route definitions and router builder.

pub mod devices;
pub mod gate;
pub mod health;
pub mod identity;

use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/gate/open", post(gate::open_gate))
        .route("/gate/logs", get(gate::list_logs))
        .route("/gate/devices/{device_id}/status", get(devices::get_status))
        .route(
            "/gate/devices/{device_id}/diagnostics",
            get(devices::list_diagnostics),
        );

    Router::new()
        .route("/health", get(health::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
