//! MQTT session driver for the simulator.

use std::sync::Arc;

use gk_mqtt_channel::{Session, SessionEvent};

use crate::device::SimDevice;

/// Drive the session and hand command-topic publishes to the device.
///
/// Runs until the task is cancelled.
pub async fn run(mut session: Session, device: Arc<SimDevice>) {
    loop {
        match session.next().await {
            SessionEvent::Connected { session_present } => {
                tracing::info!(session_present, "connected to broker");
                device.on_connected().await;
            }
            SessionEvent::Disconnected { error } => {
                tracing::warn!(error = %error, "broker connection lost");
                device.on_disconnected();
            }
            SessionEvent::Message(publish) => {
                handle_publish(&device, &publish.topic, &publish.payload);
            }
        }
    }
}

/// Route one inbound publish. Only the command topic is meaningful here.
pub fn handle_publish(device: &Arc<SimDevice>, topic: &str, payload: &[u8]) {
    if topic == device.topics().command {
        // The ack task is detached; it outlives this call.
        let _ = device.handle_command(payload);
    } else {
        tracing::debug!(topic, "ignoring message on unexpected topic");
    }
}
