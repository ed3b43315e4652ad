use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::handler::HandlerWithoutStateExt;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use sysinfo::System;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use crate::channel::Channel;
use crate::error::MonitorError;
use crate::liveness::{DeviceStatus, Liveness};
use crate::reading::{now_millis, Latest, RawFields};
use crate::recheck::log_transition;
use crate::state::{DeviceInfo, Monitor, PumpAction, ResetScope, SharedState};

const ENDPOINTS: &[&str] = &[
    "GET /",
    "GET /api/health",
    "GET /api/status",
    "GET /api/status/all",
    "GET /api/device/info",
    "POST /api/data/{channel} (power|temperature|ph|tds|pump)",
    "GET /api/latest/{channel}",
    "GET /api/all/{channel}",
    "POST /api/pump/control",
    "DELETE /api/reset",
    "DELETE /api/reset/{channel}",
];

// ---------------------------------------------------------------------------
// State & errors
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub monitor: SharedState,
    pub server_ip: Option<String>,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error("invalid pump action '{0}'")]
    InvalidPumpAction(String),
    #[error("invalid json payload: {0}")]
    BadPayload(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (error, message) = match &self {
            ApiError::Monitor(MonitorError::InvalidChannel(_)) => (
                "Invalid sensor type",
                format!("Sensor type must be one of: {}", Channel::valid_names()),
            ),
            ApiError::InvalidPumpAction(_) => (
                "Invalid pump action",
                "Action must be one of: on, off".to_string(),
            ),
            ApiError::BadPayload(e) => ("Invalid data format", e.clone()),
        };
        tracing::warn!("request rejected: {self}");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": error, "message": message })),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState, static_dir: &str) -> Router {
    let assets = ServeDir::new(static_dir)
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(not_found.into_service());

    Router::new()
        .route("/api/data/{channel}", post(ingest))
        .route("/api/pump/control", post(control_pump))
        .route("/api/latest/{channel}", get(latest))
        .route("/api/all/{channel}", get(history))
        .route("/api/status", get(status))
        .route("/api/status/all", get(status_all))
        .route("/api/health", get(health))
        .route("/api/device/info", get(device_info))
        .route("/api/reset", delete(reset_all))
        .route("/api/reset/{channel}", delete(reset_channel))
        .fallback_service(assets)
        .layer(CorsLayer::permissive())
        .with_state(app)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found",
            "available_endpoints": ENDPOINTS,
        })),
    )
}

fn rfc3339_now() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Re-evaluate liveness so a status read reflects elapsed time.
fn evaluate_now(st: &mut Monitor, now: i64) {
    if let Some(t) = st.evaluate(now) {
        log_transition(t, &st.device_status());
    }
}

/// Decode a JSON body without requiring a content type. A blank body is `None`.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::BadPayload(e.to_string()))
}

// -- ingest -----------------------------------------------------------------

async fn ingest(
    State(app): State<AppState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // Channel first: an unknown channel is rejected before the body is read.
    channel.parse::<Channel>()?;
    // Non-object JSON (a bare number, an array) carries no fields.
    let raw = match parse_body::<Value>(&body)? {
        Some(Value::Object(map)) => map,
        _ => RawFields::new(),
    };

    let ack = {
        let mut st = app.monitor.write().await;
        let ack = st.ingest(&channel, &raw, None, now_millis())?;
        if let Some(t) = ack.transition {
            log_transition(t, &st.device_status());
        }
        ack
    };
    info!(channel = %ack.channel, device = %ack.device_id, "reading saved");

    Ok(Json(json!({
        "message": format!("Data {} received OK!", ack.channel),
        "status": "success",
        "device_status": if ack.device_online { "online" } else { "offline" },
        "server_ip": app.server_ip,
        "timestamp": rfc3339_now(),
        "ack": ack,
    })))
}

#[derive(Debug, Deserialize)]
struct PumpControlRequest {
    action: String,
    #[serde(default)]
    mode: Option<String>,
}

async fn control_pump(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: PumpControlRequest = parse_body(&body)?
        .ok_or_else(|| ApiError::BadPayload("missing request body".to_string()))?;
    let action =
        PumpAction::parse(&req.action).ok_or_else(|| ApiError::InvalidPumpAction(req.action.clone()))?;

    let ack = {
        let mut st = app.monitor.write().await;
        let ack = st.control_pump(action, req.mode.as_deref(), now_millis());
        if let Some(t) = ack.transition {
            log_transition(t, &st.device_status());
        }
        ack
    };
    info!(?action, mode = ?req.mode, "pump control");

    Ok(Json(json!({
        "status": "success",
        "message": match action {
            PumpAction::On => "Pump switched on",
            PumpAction::Off => "Pump switched off",
        },
        "device_online": ack.device_online,
        "data": ack.data,
    })))
}

// -- reads ------------------------------------------------------------------

#[derive(Serialize)]
struct LatestResponse {
    #[serde(flatten)]
    data: Latest,
    sensor_type: Channel,
    last_update: Option<i64>,
    device_status: DeviceStatus,
    server_ip: Option<String>,
}

async fn latest(
    State(app): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<LatestResponse>, ApiError> {
    let sensor_type: Channel = channel.parse()?;
    let st = app.monitor.read().await;
    Ok(Json(LatestResponse {
        data: st.latest(&channel)?,
        sensor_type,
        last_update: st.last_update(sensor_type),
        device_status: st.device_status(),
        server_ip: app.server_ip.clone(),
    }))
}

async fn history(
    State(app): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let sensor_type: Channel = channel.parse()?;
    let st = app.monitor.read().await;
    let view = st.history(&channel)?;
    Ok(Json(json!({
        "data": view.data,
        "count": view.count,
        "sensor_type": sensor_type,
        "server_ip": app.server_ip,
        "device_status": st.device_status(),
    })))
}

async fn status(State(app): State<AppState>) -> Json<DeviceStatus> {
    let mut st = app.monitor.write().await;
    evaluate_now(&mut st, now_millis());
    Json(st.device_status())
}

async fn status_all(State(app): State<AppState>) -> Json<Value> {
    let now = now_millis();
    let mut st = app.monitor.write().await;
    evaluate_now(&mut st, now);
    Json(json!({
        "server": "online",
        "timestamp": rfc3339_now(),
        "device_status": st.device_status(),
        "sensors": st.channel_statuses(now),
    }))
}

async fn health(State(app): State<AppState>) -> Json<Value> {
    let now = now_millis();
    let mut st = app.monitor.write().await;
    evaluate_now(&mut st, now);

    let sensor_status: BTreeMap<Channel, Liveness> = Channel::ALL
        .iter()
        .map(|&c| (c, st.channel_status(c, now)))
        .collect();

    Json(json!({
        "status": "healthy",
        "server_ip": app.server_ip,
        "port": app.port,
        "timestamp": rfc3339_now(),
        "uptime": st.uptime_secs(),
        "device_status": st.device_status(),
        "sensors_online": st.channels_online(now),
        "sensors_total": Channel::COUNT,
        "sensor_status": sensor_status,
        "host": {
            "name": System::host_name(),
            "uptime": System::uptime(),
        },
    }))
}

#[derive(Serialize)]
struct DeviceInfoResponse {
    #[serde(flatten)]
    info: DeviceInfo,
    server_uptime: u64,
    server_ip: Option<String>,
}

async fn device_info(State(app): State<AppState>) -> Json<DeviceInfoResponse> {
    let now = now_millis();
    let mut st = app.monitor.write().await;
    evaluate_now(&mut st, now);
    Json(DeviceInfoResponse {
        info: st.device_info(now),
        server_uptime: st.uptime_secs(),
        server_ip: app.server_ip.clone(),
    })
}

// -- reset ------------------------------------------------------------------

async fn reset_all(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    reset(app, None).await
}

async fn reset_channel(
    State(app): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<Value>, ApiError> {
    reset(app, Some(channel)).await
}

async fn reset(app: AppState, channel: Option<String>) -> Result<Json<Value>, ApiError> {
    let scope = app.monitor.write().await.reset(channel.as_deref())?;
    let message = match scope {
        ResetScope::Channel(c) => {
            info!(channel = %c, "channel data reset by client");
            format!("Data {c} reset successfully")
        }
        ResetScope::All => {
            info!("all data reset by client");
            "All sensor data reset successfully".to_string()
        }
    };
    Ok(Json(json!({ "message": message, "server_ip": app.server_ip })))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(
    app: AppState,
    addr: SocketAddr,
    static_dir: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {addr}"))?;

    info!("web ui listening on http://{addr}");

    axum::serve(listener, router(app, &static_dir))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
