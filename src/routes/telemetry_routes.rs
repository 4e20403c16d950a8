use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use crate::controllers::telemetry_controller::TelemetryController;
use crate::dto::telemetry_dto::{BatchesQuery, IngestHealthResponse, IngestResponse, IngestStatsResponse};
use crate::models::batch::IngestionBatch;
use crate::state::AppState;
use crate::utils::errors::{bad_request_error, AppError};

/// Tamaño máximo del cuerpo de ingesta
const MAX_INGEST_BODY_BYTES: usize = 32 * 1024 * 1024;

pub fn create_telemetry_router() -> Router<AppState> {
    Router::new()
        .route(
            "/ingest",
            post(ingest).layer(DefaultBodyLimit::max(MAX_INGEST_BODY_BYTES)),
        )
        .route("/ingest/stats", get(ingest_stats))
        .route("/ingest/health", get(ingest_health))
        .route("/batches", get(list_batches))
        .route("/batches/:batch_id", get(get_batch))
}

/// Acepta cualquier JSON; el formato se detecta a partir de su forma
async fn ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| bad_request_error(&format!("Invalid JSON: {}", e)))?;
    let controller = TelemetryController::new(&state);
    let response = controller.ingest(payload).await?;
    Ok(Json(response))
}

async fn ingest_stats(State(state): State<AppState>) -> Result<Json<IngestStatsResponse>, AppError> {
    let controller = TelemetryController::new(&state);
    Ok(Json(controller.stats().await?))
}

async fn ingest_health(State(state): State<AppState>) -> Result<Json<IngestHealthResponse>, AppError> {
    let controller = TelemetryController::new(&state);
    Ok(Json(controller.health().await?))
}

async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<BatchesQuery>,
) -> Result<Json<Vec<IngestionBatch>>, AppError> {
    let controller = TelemetryController::new(&state);
    Ok(Json(controller.recent_batches(query.limit).await?))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
) -> Result<Json<IngestionBatch>, AppError> {
    let controller = TelemetryController::new(&state);
    Ok(Json(controller.batch(batch_id).await?))
}
