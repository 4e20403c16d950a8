use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::controllers::anomaly_controller::AnomalyController;
use crate::dto::anomaly_dto::{AlertsQuery, AlertsResponse, MarkProcessedResponse, RecordedAnomaly};
use crate::dto::ApiResponse;
use crate::models::anomaly::{AnomalyEvent, NewAnomalyEvent};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_anomaly_router() -> Router<AppState> {
    Router::new()
        .route("/", post(record_anomaly).get(list_alerts))
        .route("/:id", get(get_anomaly))
        .route("/:id/processed", post(mark_processed))
}

async fn record_anomaly(
    State(state): State<AppState>,
    Json(event): Json<NewAnomalyEvent>,
) -> Result<Json<ApiResponse<RecordedAnomaly>>, AppError> {
    let controller = AnomalyController::new(&state);
    let recorded = controller.record(event).await?;
    Ok(Json(ApiResponse::success_with_message(
        recorded,
        "Anomalía registrada".to_string(),
    )))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<AlertsResponse>, AppError> {
    let controller = AnomalyController::new(&state);
    Ok(Json(controller.alerts(query).await?))
}

async fn get_anomaly(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnomalyEvent>, AppError> {
    let controller = AnomalyController::new(&state);
    Ok(Json(controller.get(id).await?))
}

async fn mark_processed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MarkProcessedResponse>, AppError> {
    let controller = AnomalyController::new(&state);
    Ok(Json(controller.mark_processed(id).await?))
}
