use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::anomaly::{AnomalyEvent, AnomalyType};

/// Alertas devueltas si la consulta no trae `limit`
pub const DEFAULT_ALERT_LIMIT: usize = 100;
pub const MAX_ALERT_LIMIT: usize = 1000;

// Query de anomalías paginadas; `after` es el cursor `timestamp|uuid`
#[derive(Debug, Default, Deserialize)]
pub struct AnomaliesQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub after: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecordedAnomaly {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MarkProcessedResponse {
    pub id: Uuid,
    pub processed: bool,
    /// `false` si ya estaba procesado antes de esta llamada
    pub transitioned: bool,
}

// Feed de alertas de toda la flota
#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub alert_type: Option<String>,
    pub vehicle_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
}

impl AlertsQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_ALERT_LIMIT)
            .clamp(1, MAX_ALERT_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct AlertFilters {
    pub alert_type: Option<AnomalyType>,
    pub vehicle_id: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AnomalyEvent>,
    pub count: usize,
    pub filters_applied: AlertFilters,
}
