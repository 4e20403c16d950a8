//! Métricas Prometheus del motor
//!
//! Registro propio por instancia (sin estado global) expuesto en `/metrics`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::models::batch::BatchCounts;
use crate::models::kpi::RollupOutcome;
use crate::utils::errors::{AppError, AppResult};

#[derive(Clone)]
pub struct MetricsService {
    registry: Registry,
    readings_total: IntCounterVec,
    batches_total: IntCounter,
    batch_duration: Histogram,
    reading_chunks: IntGauge,
    kpi_rollups_total: IntCounterVec,
    anomalies_total: IntCounter,
}

impl MetricsService {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let readings_total = IntCounterVec::new(
            Opts::new("telemetry_readings_total", "Readings seen by ingestion, by outcome"),
            &["outcome"],
        )?;
        let batches_total = IntCounter::new("telemetry_batches_total", "Ingestion batches finalized")?;
        let batch_duration = Histogram::with_opts(
            HistogramOpts::new("telemetry_batch_duration_seconds", "Wall-clock time per ingestion batch")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        let reading_chunks = IntGauge::new("telemetry_reading_chunks", "Live reading chunks")?;
        let kpi_rollups_total = IntCounterVec::new(
            Opts::new("telemetry_kpi_rollups_total", "Hourly KPI computations, by outcome"),
            &["outcome"],
        )?;
        let anomalies_total = IntCounter::new("telemetry_anomalies_total", "Anomaly events recorded")?;

        registry.register(Box::new(readings_total.clone()))?;
        registry.register(Box::new(batches_total.clone()))?;
        registry.register(Box::new(batch_duration.clone()))?;
        registry.register(Box::new(reading_chunks.clone()))?;
        registry.register(Box::new(kpi_rollups_total.clone()))?;
        registry.register(Box::new(anomalies_total.clone()))?;

        Ok(Self {
            registry,
            readings_total,
            batches_total,
            batch_duration,
            reading_chunks,
            kpi_rollups_total,
            anomalies_total,
        })
    }

    pub fn record_batch(&self, counts: &BatchCounts, elapsed_secs: f64) {
        self.readings_total
            .with_label_values(&["inserted"])
            .inc_by(u64::from(counts.processed));
        self.readings_total
            .with_label_values(&["duplicate"])
            .inc_by(u64::from(counts.duplicate));
        self.readings_total
            .with_label_values(&["error"])
            .inc_by(u64::from(counts.error));
        self.batches_total.inc();
        self.batch_duration.observe(elapsed_secs);
    }

    pub fn record_rollup(&self, outcome: RollupOutcome) {
        let label = match outcome {
            RollupOutcome::Created => "created",
            RollupOutcome::Unchanged => "unchanged",
            RollupOutcome::Recomputed => "recomputed",
            RollupOutcome::Stale => "stale",
        };
        self.kpi_rollups_total.with_label_values(&[label]).inc();
    }

    pub fn record_anomaly(&self) {
        self.anomalies_total.inc();
    }

    pub fn set_reading_chunks(&self, chunks: usize) {
        self.reading_chunks.set(chunks as i64);
    }

    /// Exposición en formato texto de Prometheus
    pub fn render(&self) -> AppResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::Internal(format!("metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| AppError::Internal(format!("metrics are not UTF-8: {}", e)))
    }
}
