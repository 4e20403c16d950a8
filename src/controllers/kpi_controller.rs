use std::sync::Arc;

use validator::Validate;

use crate::dto::common::{parse_query_datetime, resolve_range};
use crate::dto::kpi_dto::HourRequest;
use crate::dto::telemetry_dto::RangeQuery;
use crate::models::kpi::{HourlyKpi, KpiRollup, VehicleStats};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub struct KpiController {
    state: AppState,
}

impl KpiController {
    pub fn new(state: &AppState) -> Self {
        Self {
            state: state.clone(),
        }
    }

    pub async fn list(&self, vehicle_id: &str, query: RangeQuery) -> Result<Vec<Arc<HourlyKpi>>, AppError> {
        let range = resolve_range(query.from.as_deref(), query.to.as_deref())?;
        Ok(self.state.kpis.kpis_in_range(vehicle_id, &range))
    }

    pub async fn compute(&self, vehicle_id: &str, request: HourRequest) -> Result<KpiRollup, AppError> {
        request.validate()?;
        let hour_start = parse_query_datetime("hour_start", &request.hour_start)?;
        self.state.kpis.compute(vehicle_id, hour_start)
    }

    pub async fn recompute(&self, vehicle_id: &str, request: HourRequest) -> Result<Arc<HourlyKpi>, AppError> {
        request.validate()?;
        let hour_start = parse_query_datetime("hour_start", &request.hour_start)?;
        self.state.kpis.recompute(vehicle_id, hour_start)
    }

    pub async fn stats(&self, vehicle_id: &str, query: RangeQuery) -> Result<VehicleStats, AppError> {
        let range = resolve_range(query.from.as_deref(), query.to.as_deref())?;
        self.state.kpis.vehicle_stats(vehicle_id, &range).await
    }
}
