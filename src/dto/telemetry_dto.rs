use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::batch::{BatchResult, RecordError};
use crate::models::telemetry::IngestionFormat;

// Query de lecturas paginadas
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub after: Option<String>,
    pub limit: Option<usize>,
}

// Query de rango simple
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchesQuery {
    pub limit: Option<usize>,
}

/// Respuesta de `POST /api/telemetry/ingest`
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub format_detected: &'static str,
    pub batch_id: u64,
    pub batch_timestamp: DateTime<Utc>,
    pub total_count: u32,
    pub processed_count: u32,
    pub duplicate_count: u32,
    pub error_count: u32,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RecordError>,
}

impl From<BatchResult> for IngestResponse {
    fn from(result: BatchResult) -> Self {
        Self {
            status: if result.total == 0 { "no_data" } else { "success" },
            format_detected: result.format.as_str(),
            batch_id: result.batch_id,
            batch_timestamp: result.batch_timestamp,
            total_count: result.total,
            processed_count: result.processed,
            duplicate_count: result.duplicate,
            error_count: result.error,
            processing_time_ms: result.processing_time_ms,
            errors: result.errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TimeRangeSummary {
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BatchStatistics {
    pub total_submitted: u64,
    pub total_processed: u64,
    pub total_duplicates: u64,
    pub total_errors: u64,
    pub completed_batches: u64,
    pub aborted_batches: u64,
    pub avg_processing_time_ms: Option<f64>,
}

/// Respuesta de `GET /api/telemetry/ingest/stats`
#[derive(Debug, Serialize)]
pub struct IngestStatsResponse {
    pub total_readings: u64,
    pub unique_vehicles: usize,
    pub total_batches: u64,
    pub total_anomalies: u64,
    pub reading_chunks: usize,
    pub store_closed: bool,
    pub time_range: TimeRangeSummary,
    pub batches_by_format: BTreeMap<IngestionFormat, u64>,
    pub batch_statistics: BatchStatistics,
}

#[derive(Debug, Serialize)]
pub struct HealthStatistics {
    pub total_readings: u64,
    pub total_batches: u64,
    pub error_rate_percent: f64,
    pub last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HealthIndicators {
    pub store_open: bool,
    pub recent_activity: bool,
    pub error_rate_acceptable: bool,
}

/// Respuesta de `GET /api/telemetry/ingest/health`
#[derive(Debug, Serialize)]
pub struct IngestHealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub statistics: HealthStatistics,
    pub health_indicators: HealthIndicators,
}
