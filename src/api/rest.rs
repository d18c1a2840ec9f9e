// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Reads serve the active session; the
// three POST endpoints each build a new session through the session manager.
// Configuration errors come back as 400 with the error text.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::error::EngineError;
use crate::instruments::{self, Instrument};
use crate::market_data::Candle;
use crate::session::{Session, SessionSummary};
use crate::timeframe::Timeframe;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Reads ───────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/indicators", get(indicators))
        .route("/api/v1/signal", get(signal))
        .route("/api/v1/instruments", get(instrument_list))
        // ── Session control ─────────────────────────────────────────
        .route("/api/v1/session/instrument", post(change_instrument))
        .route("/api/v1/session/timeframe", post(change_timeframe))
        .route("/api/v1/session/params", post(change_params))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

fn no_session() -> ApiError {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "no active session")
}

fn active_session(state: &AppState) -> Result<Arc<Session>, ApiError> {
    state.sessions.current().ok_or_else(no_session)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    generation: u64,
    server_time: i64,
    session_health: Option<String>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        generation: state.sessions.generation(),
        server_time: chrono::Utc::now().timestamp_millis(),
        session_health: state.sessions.current().map(|s| s.health().to_string()),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot
// =============================================================================

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Series
// =============================================================================

#[derive(Deserialize)]
struct CandleQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct CandlesResponse {
    instrument: String,
    timeframe: String,
    candles: Vec<Candle>,
}

async fn candles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session = active_session(&state)?;
    let mut candles = session.candles();
    if let Some(limit) = query.limit {
        let skip = candles.len().saturating_sub(limit);
        candles.drain(..skip);
    }
    Ok(Json(CandlesResponse {
        instrument: session.instrument.key.clone(),
        timeframe: session.timeframe.token().to_string(),
        candles,
    }))
}

async fn indicators(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let session = active_session(&state)?;
    let analysis = session
        .analysis()
        .ok_or_else(|| error_response(StatusCode::SERVICE_UNAVAILABLE, "no data"))?;
    Ok(Json(serde_json::json!({
        "indicators": analysis.indicators,
        "structure": analysis.structure,
        "bars": analysis.bars,
        "computed_at": analysis.computed_at,
    })))
}

async fn signal(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let session = active_session(&state)?;
    let signal = session
        .signal()
        .ok_or_else(|| error_response(StatusCode::SERVICE_UNAVAILABLE, "no data"))?;
    Ok(Json(signal))
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Serialize)]
struct InstrumentInfo {
    #[serde(flatten)]
    instrument: Instrument,
    timeframes: Vec<&'static str>,
}

async fn instrument_list() -> impl IntoResponse {
    let list: Vec<InstrumentInfo> = instruments::all()
        .into_iter()
        .map(|instrument| {
            let timeframes = Timeframe::ALL
                .iter()
                .filter(|tf| tf.provider_interval(instrument.asset_class).is_ok())
                .map(Timeframe::token)
                .collect();
            InstrumentInfo { instrument, timeframes }
        })
        .collect();
    Json(list)
}

// =============================================================================
// Session control
// =============================================================================

#[derive(Deserialize)]
struct InstrumentRequest {
    instrument: String,
}

#[derive(Deserialize)]
struct TimeframeRequest {
    timeframe: String,
}

async fn change_instrument(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InstrumentRequest>,
) -> Result<Json<SessionSummary>, ApiError> {
    let result = state.sessions.change_instrument(&req.instrument).await;
    finish_switch(&state, result, "instrument")
}

async fn change_timeframe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TimeframeRequest>,
) -> Result<Json<SessionSummary>, ApiError> {
    let result = state.sessions.change_timeframe(&req.timeframe).await;
    finish_switch(&state, result, "timeframe")
}

async fn change_params(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<SessionSummary>, ApiError> {
    let result = match state.sessions.config().merged(&patch) {
        Ok(config) => state.sessions.change_params(config).await,
        Err(e) => Err(e),
    };
    finish_switch(&state, result, "params")
}

fn finish_switch(
    state: &AppState,
    result: Result<Arc<Session>, EngineError>,
    what: &str,
) -> Result<Json<SessionSummary>, ApiError> {
    match result {
        Ok(session) => {
            info!(
                change = what,
                instrument = %session.instrument.key,
                timeframe = %session.timeframe,
                generation = session.generation,
                "session switched via API"
            );
            state.persist_config();
            Ok(Json(session.summary()))
        }
        Err(e) => {
            warn!(change = what, error = %e, "session switch rejected");
            state.push_error_with_code(e.to_string(), Some(what.to_string()));
            let status = if e.is_config_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Err(error_response(status, e.to_string()))
        }
    }
}
