//! Last-known device status, fed by heartbeats. Advisory only.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gk_protocol::StatusMessage;

/// How much to trust that a device is there right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Online,
    Offline,
    /// Last heartbeat is older than twice the expected interval.
    Stale,
    /// Never heard from.
    Unknown,
}

/// A status message plus when the backend received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub status: StatusMessage,
    pub received_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// Staleness is judged on the server clock; controllers may not have
    /// wall-clock time.
    pub fn reachability(&self, heartbeat_interval: Duration, now: DateTime<Utc>) -> Reachability {
        // Negative ages (clock skew) count as fresh.
        let age = now
            .signed_duration_since(self.received_at)
            .to_std()
            .unwrap_or_default();
        if age > heartbeat_interval * 2 {
            Reachability::Stale
        } else if self.status.online {
            Reachability::Online
        } else {
            Reachability::Offline
        }
    }
}

pub struct StatusTracker {
    heartbeat_interval: Duration,
    devices: RwLock<HashMap<String, DeviceSnapshot>>,
}

impl StatusTracker {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Store `status` unless a snapshot with a newer or equal `updatedAt`
    /// is already held. Returns whether it was stored.
    pub fn on_status(&self, status: StatusMessage) -> bool {
        self.on_status_at(status, Utc::now())
    }

    pub fn on_status_at(&self, status: StatusMessage, received_at: DateTime<Utc>) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = devices.get(&status.device_id) {
            if current.status.updated_at >= status.updated_at {
                return false;
            }
        }
        devices.insert(
            status.device_id.clone(),
            DeviceSnapshot {
                status,
                received_at,
            },
        );
        true
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    pub fn reachability(&self, device_id: &str) -> Reachability {
        self.get(device_id)
            .map(|snapshot| snapshot.reachability(self.heartbeat_interval, Utc::now()))
            .unwrap_or(Reachability::Unknown)
    }
}
