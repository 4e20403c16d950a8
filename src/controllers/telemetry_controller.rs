use chrono::{Duration, Utc};
use serde_json::Value;

use crate::dto::common::{parse_query_datetime, resolve_range, PageResponse};
use crate::dto::telemetry_dto::{
    BatchStatistics, HealthIndicators, HealthStatistics, IngestHealthResponse, IngestResponse,
    IngestStatsResponse, RangeQuery, ReadingsQuery, TimeRangeSummary,
};
use crate::models::batch::IngestionBatch;
use crate::models::page_limit;
use crate::models::telemetry::Reading;
use crate::services::TelemetryPayload;
use crate::state::AppState;
use crate::utils::errors::{not_found_error, AppError};

/// Un lote completado en esta ventana cuenta como actividad reciente
const RECENT_ACTIVITY_MINUTES: i64 = 5;
const ACCEPTABLE_ERROR_RATE_PCT: f64 = 5.0;
const DEFAULT_BATCH_LIST: usize = 50;

pub struct TelemetryController {
    state: AppState,
}

impl TelemetryController {
    pub fn new(state: &AppState) -> Self {
        Self {
            state: state.clone(),
        }
    }

    pub async fn ingest(&self, body: Value) -> Result<IngestResponse, AppError> {
        let payload = TelemetryPayload::detect(body)?;
        let result = self.state.ingestion.ingest(payload).await?;
        Ok(IngestResponse::from(result))
    }

    pub async fn stats(&self) -> Result<IngestStatsResponse, AppError> {
        let store = self.state.readings.stats();
        let ledger = self.state.batches.summary();

        Ok(IngestStatsResponse {
            total_readings: store.total_readings,
            unique_vehicles: store.vehicle_count,
            total_batches: ledger.total_batches,
            total_anomalies: self.state.anomaly_store.len(),
            reading_chunks: store.chunk_count,
            store_closed: store.closed,
            time_range: TimeRangeSummary {
                oldest_timestamp: store.earliest_reading,
                latest_timestamp: store.latest_reading,
            },
            batches_by_format: ledger.batches_by_format,
            batch_statistics: BatchStatistics {
                total_submitted: ledger.total_readings,
                total_processed: ledger.processed_readings,
                total_duplicates: ledger.duplicate_readings,
                total_errors: ledger.error_readings,
                completed_batches: ledger.completed_batches,
                aborted_batches: ledger.aborted_batches,
                avg_processing_time_ms: ledger.avg_processing_time_ms,
            },
        })
    }

    pub async fn health(&self) -> Result<IngestHealthResponse, AppError> {
        let now = Utc::now();
        let ledger = self.state.batches.summary();
        let recent_activity = ledger
            .last_completed_at
            .map(|at| now - at <= Duration::minutes(RECENT_ACTIVITY_MINUTES))
            .unwrap_or(false);

        let status = if recent_activity {
            "healthy"
        } else if ledger.total_batches > 0 {
            "stale"
        } else {
            "waiting"
        };
        let error_rate = ledger.batches_with_errors as f64 / ledger.total_batches.max(1) as f64 * 100.0;
        let error_rate = (error_rate * 100.0).round() / 100.0;

        Ok(IngestHealthResponse {
            status,
            timestamp: now,
            statistics: HealthStatistics {
                total_readings: self.state.readings.len(),
                total_batches: ledger.total_batches,
                error_rate_percent: error_rate,
                last_completed_at: ledger.last_completed_at,
            },
            health_indicators: HealthIndicators {
                store_open: !self.state.readings.is_closed(),
                recent_activity,
                error_rate_acceptable: error_rate < ACCEPTABLE_ERROR_RATE_PCT,
            },
        })
    }

    pub async fn recent_batches(&self, limit: Option<usize>) -> Result<Vec<IngestionBatch>, AppError> {
        Ok(self.state.batches.recent(limit.unwrap_or(DEFAULT_BATCH_LIST).min(1000)))
    }

    pub async fn batch(&self, batch_id: u64) -> Result<IngestionBatch, AppError> {
        self.state
            .batches
            .get(batch_id)
            .ok_or_else(|| not_found_error("Ingestion batch", &batch_id.to_string()))
    }

    pub async fn readings(
        &self,
        vehicle_id: &str,
        query: ReadingsQuery,
    ) -> Result<PageResponse<Reading>, AppError> {
        let range = resolve_range(query.from.as_deref(), query.to.as_deref())?;
        let after = query
            .after
            .as_deref()
            .map(|raw| parse_query_datetime("after", raw))
            .transpose()?;
        let page = self
            .state
            .readings
            .query_page(vehicle_id, &range, after, page_limit(query.limit));
        Ok(PageResponse::from(page))
    }

    pub async fn idle_readings(&self, vehicle_id: &str, query: RangeQuery) -> Result<Vec<Reading>, AppError> {
        let range = resolve_range(query.from.as_deref(), query.to.as_deref())?;
        Ok(self.state.readings.idle_readings(vehicle_id, &range))
    }
}
