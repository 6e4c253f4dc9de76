//! Shared test harness for E2E integration tests.
//!
//! Wires the gate API and the device simulator through one `MockChannel`
//! acting as the broker: commands go to the simulator, everything else
//! goes through the API's MQTT bridge.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

use gk_device_sim::config::SimConfig;
use gk_device_sim::device::SimDevice;
use gk_device_sim::mqtt_loop;
use gk_gate_api::config::ApiConfig;
use gk_gate_api::engine::AuditRecord;
use gk_gate_api::mqtt_bridge;
use gk_gate_api::routes::build_router;
use gk_gate_api::state::AppState;
use gk_mqtt_channel::{Channel, MockChannel, MqttConfig};

pub const GATE_DEVICE_ID: &str = "mitspe6-gate-001";

/// One HTTP response, decoded.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Gate API + simulated controller over a shared mock broker.
pub struct TestHarness {
    pub state: AppState,
    pub router: Router,
    pub mqtt: Arc<MockChannel>,
    pub device: Arc<SimDevice>,
    /// When false, commands are lost before reaching the controller.
    device_online: Arc<AtomicBool>,
    broker: JoinHandle<()>,
}

impl TestHarness {
    /// Default API config and a simulator in `success` mode.
    pub fn new() -> Self {
        Self::with(|_| {}, |_| {})
    }

    pub fn with(api: impl FnOnce(&mut ApiConfig), sim: impl FnOnce(&mut SimConfig)) -> Self {
        let mqtt = Arc::new(MockChannel::new());
        let channel: Arc<dyn Channel> = mqtt.clone();

        let mut api_config = ApiConfig {
            gate_device_id: Some(GATE_DEVICE_ID.into()),
            ..ApiConfig::default()
        };
        api(&mut api_config);
        let state = AppState::build(&api_config, None, Some(Arc::clone(&channel)));

        let mut sim_config =
            SimConfig::for_device(GATE_DEVICE_ID, MqttConfig::new("mqtt://localhost", "sim"));
        sim_config.session_id = Some("e2e".into());
        sim(&mut sim_config);
        let device = Arc::new(SimDevice::new(&sim_config, channel));

        let device_online = Arc::new(AtomicBool::new(true));
        let broker = spawn_broker(&mqtt, state.clone(), Arc::clone(&device), Arc::clone(&device_online));

        Self {
            router: build_router(state.clone()),
            state,
            mqtt,
            device,
            device_online,
            broker,
        }
    }

    pub fn set_device_online(&self, online: bool) {
        self.device_online.store(online, Ordering::SeqCst);
    }

    /// POST /api/gate/open as `user_id`.
    pub async fn open_gate(&self, user_id: &str, request_id: Option<Uuid>) -> Reply {
        let mut request = Request::post("/api/gate/open")
            .header("x-user-id", user_id)
            .header("x-device-id", format!("{user_id}-phone"))
            .header("x-forwarded-for", "198.51.100.23")
            .header("user-agent", "gate-app/e2e");
        if let Some(id) = request_id {
            request = request.header("x-request-id", id.to_string());
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    /// GET `uri` as an admin.
    pub async fn admin_get(&self, uri: &str) -> Reply {
        let request = Request::get(uri)
            .header("x-user-id", "admin-1")
            .header("x-device-id", "admin-laptop")
            .header("x-user-role", "admin")
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn audit_log(&self) -> Vec<AuditRecord> {
        self.state.engine.audit().recent(200).await.unwrap()
    }

    /// Commands published to the controller so far.
    pub fn commands_sent(&self) -> usize {
        self.mqtt.published_to(&self.state.topics.command).len()
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        Reply {
            status,
            headers,
            body,
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.broker.abort();
    }
}

/// Deliver every publish on the mock to its subscriber.
fn spawn_broker(
    mqtt: &Arc<MockChannel>,
    state: AppState,
    device: Arc<SimDevice>,
    device_online: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let mut rx = mqtt.listen();
    tokio::spawn(async move {
        loop {
            let msg = match rx.recv().await {
                Ok(msg) => msg,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if msg.topic == state.topics.command {
                if device_online.load(Ordering::SeqCst) {
                    mqtt_loop::handle_publish(&device, &msg.topic, &msg.payload);
                }
            } else {
                mqtt_bridge::handle_incoming(&msg.topic, &msg.payload, &state).await;
            }
        }
    })
}
