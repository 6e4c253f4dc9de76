//! Gate open and audit log endpoints.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::engine::{AttemptContext, AttemptResult, AuditRecord, GateOutcome};
use crate::error::{ApiError, ApiResult};
use crate::routes::identity::{AuthenticatedUser, ClientInfo};
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 200;

/// Optional idempotency key. Present but not a UUID → 400.
fn request_id(headers: &HeaderMap) -> ApiResult<Option<Uuid>> {
    let Some(value) = headers.get(REQUEST_ID_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest("X-Request-Id must be a UUID".into()))
}

fn status_for(outcome: &GateOutcome) -> StatusCode {
    match outcome {
        GateOutcome::Opened => StatusCode::OK,
        GateOutcome::AlreadyInFlight => StatusCode::CONFLICT,
        GateOutcome::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GateOutcome::DeviceRejected { .. } => StatusCode::BAD_GATEWAY,
        GateOutcome::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        GateOutcome::TransportUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_message(outcome: &GateOutcome) -> &'static str {
    match outcome {
        GateOutcome::Opened => "",
        GateOutcome::AlreadyInFlight => "a gate request is already in progress",
        GateOutcome::RateLimited { .. } => "too many gate requests",
        GateOutcome::DeviceRejected { .. } => "gate controller rejected the command",
        GateOutcome::TimedOut => "gate controller did not acknowledge in time",
        GateOutcome::TransportUnavailable { .. } => "gate controller is unreachable",
    }
}

/// Whole seconds, rounded up, never below one.
fn retry_after_secs(outcome: &GateOutcome) -> Option<u64> {
    match outcome {
        GateOutcome::RateLimited { retry_after } => {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            Some(secs.max(1))
        }
        _ => None,
    }
}

pub fn attempt_response(result: &AttemptResult) -> Response {
    let status = status_for(&result.outcome);

    let mut body = Map::new();
    body.insert("requestId".into(), json!(result.request_id));
    body.insert("outcome".into(), json!(result.outcome.kind()));
    if result.replayed {
        body.insert("replayed".into(), Value::Bool(true));
    }
    if let Some(code) = result.outcome.error_code() {
        body.insert("errorCode".into(), json!(code));
    }
    if let Some(device) = result.device {
        body.insert("device".into(), json!(device));
    }
    let retry_after = retry_after_secs(&result.outcome);
    if let Some(secs) = retry_after {
        body.insert("retryAfter".into(), json!(secs));
    }
    if !status.is_success() {
        body.insert("error".into(), json!(error_message(&result.outcome)));
        body.insert("status".into(), json!(status.as_u16()));
    }

    let mut response = (status, Json(Value::Object(body))).into_response();
    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// POST /api/gate/open — run one open-gate attempt.
pub async fn open_gate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    client: ClientInfo,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let request_id = request_id(&headers)?;
    let result = state
        .engine
        .open_gate(AttemptContext {
            user_id: user.user_id,
            device_id: user.device_id,
            request_id,
            ip: client.ip,
            user_agent: client.user_agent,
        })
        .await;
    Ok(attempt_response(&result))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/gate/logs — latest audit records, admin only.
pub async fn list_logs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    user.require_admin()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    let records = state.engine.audit().recent(limit).await?;
    Ok(Json(records))
}
