use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};

use crate::controllers::anomaly_controller::AnomalyController;
use crate::controllers::kpi_controller::KpiController;
use crate::controllers::telemetry_controller::TelemetryController;
use crate::controllers::vehicle_controller::VehicleController;
use crate::dto::anomaly_dto::AnomaliesQuery;
use crate::dto::kpi_dto::HourRequest;
use crate::dto::telemetry_dto::{RangeQuery, ReadingsQuery};
use crate::dto::vehicle_dto::VehicleFilters;
use crate::dto::{ApiResponse, PageResponse};
use crate::models::anomaly::AnomalyEvent;
use crate::models::kpi::{HourlyKpi, KpiRollup, VehicleStats};
use crate::models::telemetry::Reading;
use crate::models::vehicle::{UpdateVehicleRequest, UpsertVehicleRequest, Vehicle};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_vehicle_router() -> Router<AppState> {
    Router::new()
        .route("/", post(upsert_vehicle).get(list_vehicles))
        .route(
            "/:id",
            get(get_vehicle).put(update_vehicle).delete(deactivate_vehicle),
        )
        .route("/:id/readings", get(list_readings))
        .route("/:id/readings/idle", get(list_idle_readings))
        .route("/:id/anomalies", get(list_anomalies))
        .route("/:id/kpis", get(list_kpis))
        .route("/:id/kpis/compute", post(compute_kpi))
        .route("/:id/kpis/recompute", post(recompute_kpi))
        .route("/:id/stats", get(vehicle_stats))
}

async fn upsert_vehicle(
    State(state): State<AppState>,
    Json(request): Json<UpsertVehicleRequest>,
) -> Result<Json<ApiResponse<Vehicle>>, AppError> {
    let controller = VehicleController::new(&state);
    Ok(Json(controller.upsert(request).await?))
}

async fn list_vehicles(
    State(state): State<AppState>,
    Query(filters): Query<VehicleFilters>,
) -> Result<Json<Vec<Vehicle>>, AppError> {
    let controller = VehicleController::new(&state);
    Ok(Json(controller.list(filters).await?))
}

async fn get_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vehicle>, AppError> {
    let controller = VehicleController::new(&state);
    Ok(Json(controller.get(&id).await?))
}

async fn update_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateVehicleRequest>,
) -> Result<Json<ApiResponse<Vehicle>>, AppError> {
    let controller = VehicleController::new(&state);
    Ok(Json(controller.update(&id, request).await?))
}

async fn deactivate_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vehicle>>, AppError> {
    let controller = VehicleController::new(&state);
    Ok(Json(controller.deactivate(&id).await?))
}

async fn list_readings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadingsQuery>,
) -> Result<Json<PageResponse<Reading>>, AppError> {
    let controller = TelemetryController::new(&state);
    Ok(Json(controller.readings(&id, query).await?))
}

async fn list_idle_readings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let controller = TelemetryController::new(&state);
    Ok(Json(controller.idle_readings(&id, query).await?))
}

async fn list_anomalies(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AnomaliesQuery>,
) -> Result<Json<PageResponse<AnomalyEvent>>, AppError> {
    let controller = AnomalyController::new(&state);
    Ok(Json(controller.list_for_vehicle(&id, query).await?))
}

async fn list_kpis(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<Arc<HourlyKpi>>>, AppError> {
    let controller = KpiController::new(&state);
    Ok(Json(controller.list(&id, query).await?))
}

async fn compute_kpi(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<HourRequest>,
) -> Result<Json<KpiRollup>, AppError> {
    let controller = KpiController::new(&state);
    Ok(Json(controller.compute(&id, request).await?))
}

async fn recompute_kpi(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<HourRequest>,
) -> Result<Json<Arc<HourlyKpi>>, AppError> {
    let controller = KpiController::new(&state);
    Ok(Json(controller.recompute(&id, request).await?))
}

async fn vehicle_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<VehicleStats>, AppError> {
    let controller = KpiController::new(&state);
    Ok(Json(controller.stats(&id, query).await?))
}
