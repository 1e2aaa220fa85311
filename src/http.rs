//! ==============================================================================
//! http.rs - json api and real-time endpoint
//! ==============================================================================
//!
//! routes:
//!     GET  /api/sensors/latest         latest reading (or fallback)
//!     GET  /api/sensors/history?hours  ascending readings in the window
//!     POST /api/sensors                validate + store + broadcast
//!     POST /api/controls/:action       relay to actuator + broadcast
//!     GET  /health                     liveness and viewer count
//!     GET  /ws (alias /socket)         websocket viewer stream
//!
//! relationships:
//!     - uses: service.rs, relay.rs, broadcast.rs
//!     - built by: lib.rs (build_router), served by main.rs
//!
//! ==============================================================================

use crate::config::ServerConfig;
use crate::domain::{ControlValue, Event};
use crate::error::ApiError;
use crate::relay::ControlRelay;
use crate::service::{history_window, SensorService};

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppState {
    pub sensors: SensorService,
    pub relay: ControlRelay,
    pub origins: AllowedOrigins,
}

/// origins allowed to call the api and open the real-time channel
#[derive(Clone, Debug, PartialEq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<HeaderValue>),
}

impl AllowedOrigins {
    pub fn from_config(origins: &[String]) -> Self {
        if origins.is_empty() || origins.iter().any(|o| o.trim() == "*") {
            return Self::Any;
        }
        let list = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o.trim().trim_end_matches('/')) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid allowed origin");
                    None
                }
            })
            .collect();
        Self::List(list)
    }

    /// requests without an Origin header (curl, sensors, native clients) pass
    pub fn allows(&self, origin: Option<&HeaderValue>) -> bool {
        match (self, origin) {
            (Self::Any, _) | (_, None) => true,
            (Self::List(list), Some(origin)) => list.contains(origin),
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);
        match self {
            Self::Any => layer.allow_origin(Any),
            Self::List(list) => layer.allow_origin(AllowOrigin::list(list.clone())),
        }
    }
}

// ==============================================================================
// router
// ==============================================================================

pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let cors = state.origins.cors_layer();

    let mut app = Router::new()
        .route("/api/sensors/latest", get(latest_handler))
        .route("/api/sensors/history", get(history_handler))
        .route("/api/sensors", post(ingest_handler))
        .route("/api/controls/:action", post(control_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/socket", get(ws_handler))
        .with_state(state);

    if let Some(dir) = &server.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
}

// ==============================================================================
// sensor endpoints
// ==============================================================================

async fn latest_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let latest = state.sensors.latest().await?;
    let source = latest.source();
    Ok(([("x-reading-source", source)], Json(latest.into_reading())).into_response())
}

#[derive(Deserialize)]
struct HistoryParams {
    hours: Option<String>,
}

async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let hours = history_window(params.hours.as_deref());
    let readings = state.sensors.history(hours).await?;
    Ok(Json(readings).into_response())
}

async fn ingest_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let stored = state.sensors.ingest(&body).await?;
    Ok((StatusCode::CREATED, Json(stored)).into_response())
}

// ==============================================================================
// control endpoint
// ==============================================================================

async fn control_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let value = match body.get("value") {
        None | Some(Value::Null) => return Err(ApiError::Validation("\"value\" is required".into())),
        Some(raw) => ControlValue::from_json(raw).ok_or_else(|| {
            ApiError::Validation("\"value\" must be a boolean, number or string".into())
        })?,
    };

    let command = state.relay.relay(action, value);
    Ok(Json(json!({
        "success": true,
        "action": command.action,
        "value": command.value,
    }))
    .into_response())
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "viewers": state.sensors.viewers().len(),
    }))
}

// ==============================================================================
// real-time channel
// ==============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers.get(header::ORIGIN);
    if !state.origins.allows(origin) {
        tracing::warn!(origin = ?origin, "websocket origin rejected");
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "origin not allowed" }))).into_response();
    }
    ws.on_upgrade(move |socket| serve_viewer(socket, state.sensors))
}

async fn serve_viewer(mut socket: WebSocket, sensors: SensorService) {
    let mut session = sensors.connect_viewer().await;
    let viewer = session.id();
    tracing::info!(viewer, viewers = sensors.viewers().len(), "viewer connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // viewers have nothing to say; pings are answered by axum
                Some(Ok(_)) => {}
            },
            event = session.next_event() => match event {
                Some(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    drop(session);
    tracing::info!(viewer, viewers = sensors.viewers().len(), "viewer disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    let frame = match serde_json::to_string(event) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, event = event.kind(), "could not encode event");
            return Ok(());
        }
    };
    socket.send(Message::Text(frame)).await
}
