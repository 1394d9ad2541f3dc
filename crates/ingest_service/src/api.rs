//! HTTP surface: REST ingress, recent history, health and the WebSocket route.

use crate::consumer::ConsumerState;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::ws_server::ws_handler;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use normalizer::{DataKind, RawReading, SensorRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use storage::DEFAULT_SELECT_LIMIT;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Client-facing message for any rejected reading.
pub const TEMPERATURE_RANGE_MESSAGE: &str = "Temperature must be between 0 and 100";

/// Client-facing message for internal failures. Details stay in the logs.
pub const INTERNAL_ERROR_MESSAGE: &str = "Failed to process sensor data";

/// Shared application state.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub consumer_state: watch::Receiver<ConsumerState>,
}

pub fn create_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/sensors", get(list_sensors).post(create_sensor))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_rejected() {
            warn!("Rejected HTTP reading: {}", err);
            ApiError::BadRequest(TEMPERATURE_RANGE_MESSAGE.to_string())
        } else {
            error!("HTTP ingest failed: {}", err);
            ApiError::Internal(INTERNAL_ERROR_MESSAGE.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSensorRequest {
    pub temperature: Option<Value>,
}

async fn list_sensors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SensorRecord>>, ApiError> {
    Ok(Json(state.pipeline.recent(DEFAULT_SELECT_LIMIT).await?))
}

async fn create_sensor(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSensorRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(temperature) = body.temperature.filter(|v| !v.is_null()) else {
        warn!("HTTP reading without temperature");
        return Err(ApiError::BadRequest(TEMPERATURE_RANGE_MESSAGE.to_string()));
    };

    let outcome = state
        .pipeline
        .ingest(RawReading::from(temperature), &DataKind::Temperature)
        .await?;

    Ok(Json(json!({
        "success": true,
        "id": outcome.last_id(),
        "ids": outcome.inserted_ids,
    })))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let consumer = *state.consumer_state.borrow();
    Json(json!({
        "status": "ok",
        "subscribers": state.pipeline.broadcaster().subscriber_count(),
        "consumer": consumer.as_str(),
    }))
}
