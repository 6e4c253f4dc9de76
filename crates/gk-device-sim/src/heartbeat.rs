//! Periodic status heartbeat.
//!
//! Lets the backend judge whether the controller is reachable before a
//! user presses the button.

use std::time::Duration;

use tokio::time;

use crate::device::SimDevice;

/// Publish a status message every `interval`, forever.
///
/// The first tick is skipped; `SimDevice::on_connected` already reports
/// status as soon as the link comes up.
pub async fn run(device: &SimDevice, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        device.publish_status().await;
    }
}
