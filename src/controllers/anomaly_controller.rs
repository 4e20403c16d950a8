use uuid::Uuid;

use crate::dto::anomaly_dto::{
    AlertFilters, AlertsQuery, AlertsResponse, AnomaliesQuery, MarkProcessedResponse,
    RecordedAnomaly,
};
use crate::dto::common::{resolve_range, PageResponse};
use crate::models::anomaly::{AnomalyEvent, AnomalyType, NewAnomalyEvent};
use crate::models::page_limit;
use crate::repositories::anomaly_repository::parse_anomaly_cursor;
use crate::state::AppState;
use crate::utils::errors::{validation_error, AppError};

pub struct AnomalyController {
    state: AppState,
}

impl AnomalyController {
    pub fn new(state: &AppState) -> Self {
        Self {
            state: state.clone(),
        }
    }

    pub async fn record(&self, event: NewAnomalyEvent) -> Result<RecordedAnomaly, AppError> {
        let id = self.state.anomalies.record(event).await?;
        Ok(RecordedAnomaly { id })
    }

    pub async fn get(&self, id: Uuid) -> Result<AnomalyEvent, AppError> {
        self.state.anomalies.get(id)
    }

    pub async fn mark_processed(&self, id: Uuid) -> Result<MarkProcessedResponse, AppError> {
        let transitioned = self.state.anomalies.mark_processed(id)?;
        Ok(MarkProcessedResponse {
            id,
            processed: true,
            transitioned,
        })
    }

    pub async fn list_for_vehicle(
        &self,
        vehicle_id: &str,
        query: AnomaliesQuery,
    ) -> Result<PageResponse<AnomalyEvent>, AppError> {
        let range = resolve_range(query.from.as_deref(), query.to.as_deref())?;
        let event_type = parse_event_type("type", query.event_type.as_deref())?;
        let after = match query.after.as_deref() {
            Some(raw) => Some(
                parse_anomaly_cursor(raw)
                    .ok_or_else(|| validation_error("after", "expected a '<timestamp>|<uuid>' cursor"))?,
            ),
            None => None,
        };

        let page = self.state.anomalies.query_page(
            vehicle_id,
            &range,
            event_type,
            after,
            page_limit(query.limit),
        );
        Ok(PageResponse::from(page))
    }

    /// Feed de alertas de toda la flota, las más recientes primero
    pub async fn alerts(&self, query: AlertsQuery) -> Result<AlertsResponse, AppError> {
        let range = resolve_range(query.from.as_deref(), query.to.as_deref())?;
        let alert_type = parse_event_type("alert_type", query.alert_type.as_deref())?;
        let vehicle_id = query
            .vehicle_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let alerts = self
            .state
            .anomalies
            .feed(&range, alert_type, vehicle_id.as_deref(), query.limit());
        Ok(AlertsResponse {
            count: alerts.len(),
            alerts,
            filters_applied: AlertFilters {
                alert_type,
                vehicle_id,
                from: range.start,
                to: range.end,
            },
        })
    }
}

/// Tipo de anomalía sin distinguir mayúsculas; `field` nombra el parámetro en el error
fn parse_event_type(field: &'static str, raw: Option<&str>) -> Result<Option<AnomalyType>, AppError> {
    raw.map(|raw| raw.parse::<AnomalyType>())
        .transpose()
        .map_err(|_| validation_error(field, "expected FUEL_THEFT, ROUTE_DEVIATION or UNUSUAL_STOP"))
}
