//! Gate controller status and diagnostics endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{DeviceSnapshot, Reachability};
use crate::error::{ApiError, ApiResult};
use crate::routes::identity::AuthenticatedUser;
use crate::state::{AppState, DiagnosticsRecord};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusView {
    pub device_id: String,
    pub online: bool,
    pub reachability: Reachability,
    /// Controller clock, ms since epoch.
    pub updated_at: i64,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fw_version: Option<String>,
}

impl DeviceStatusView {
    fn new(snapshot: DeviceSnapshot, reachability: Reachability) -> Self {
        Self {
            device_id: snapshot.status.device_id,
            online: snapshot.status.online,
            reachability,
            updated_at: snapshot.status.updated_at,
            received_at: snapshot.received_at,
            rssi: snapshot.status.rssi,
            fw_version: snapshot.status.fw_version,
        }
    }
}

/// GET /api/gate/devices/{deviceId}/status — last known status.
pub async fn get_status(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceStatusView>> {
    let snapshot = match state.engine.device_status(&device_id) {
        Some(snapshot) => Some(snapshot),
        None => match &state.pool {
            Some(pool) => crate::db::device_status::get(pool, &device_id)
                .await?
                .map(|row| {
                    let (status, received_at) = row.into_status();
                    DeviceSnapshot {
                        status,
                        received_at,
                    }
                }),
            None => None,
        },
    };

    let snapshot =
        snapshot.ok_or_else(|| ApiError::NotFound(format!("device '{device_id}' not found")))?;
    let reachability = snapshot.reachability(
        state.engine.status_tracker().heartbeat_interval(),
        Utc::now(),
    );
    Ok(Json(DeviceStatusView::new(snapshot, reachability)))
}

#[derive(Debug, Deserialize)]
pub struct DiagnosticsQuery {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

/// GET /api/gate/devices/{deviceId}/diagnostics — newest batches first, admin only.
pub async fn list_diagnostics(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(device_id): Path<String>,
    Query(query): Query<DiagnosticsQuery>,
) -> ApiResult<Json<Vec<DiagnosticsRecord>>> {
    user.require_admin()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let skip = query.skip.unwrap_or(0);

    if let Some(pool) = &state.pool {
        let rows =
            crate::db::diagnostics::list(pool, &device_id, limit as i64, skip as i64).await?;
        return Ok(Json(rows.into_iter().map(|row| row.into_record()).collect()));
    }

    let ring = state.diagnostics.read().await;
    let records = ring
        .iter()
        .rev()
        .filter(|r| r.device_id == device_id)
        .skip(skip)
        .take(limit)
        .cloned()
        .collect();
    Ok(Json(records))
}
