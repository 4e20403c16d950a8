//! Modelos de lotes de ingesta
//!
//! Una fila de `ingestion_batches` por llamada de ingesta. Los contadores
//! se cierran una sola vez al terminar el lote.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::telemetry::IngestionFormat;

/// Estado del lote en el ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Completed,
    Aborted,
}

/// Detalle de un registro rechazado, para diagnóstico del operador
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub reason: String,
}

/// Contadores de un lote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub total: u32,
    pub processed: u32,
    pub duplicate: u32,
    pub error: u32,
}

/// Fila del ledger de lotes
#[derive(Debug, Clone, Serialize)]
pub struct IngestionBatch {
    pub batch_id: u64,
    pub batch_timestamp: DateTime<Utc>,
    pub ingestion_format: IngestionFormat,
    pub status: BatchStatus,
    pub total_readings: u32,
    pub processed_readings: u32,
    pub duplicate_readings: u32,
    pub error_readings: u32,
    pub processing_time_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payload_metadata: Value,
    pub error_details: Vec<RecordError>,
}

impl IngestionBatch {
    pub fn counts(&self) -> BatchCounts {
        BatchCounts {
            total: self.total_readings,
            processed: self.processed_readings,
            duplicate: self.duplicate_readings,
            error: self.error_readings,
        }
    }
}

/// Resultado devuelto al productor
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: u64,
    pub format: IngestionFormat,
    pub batch_timestamp: DateTime<Utc>,
    pub total: u32,
    pub processed: u32,
    pub duplicate: u32,
    pub error: u32,
    pub processing_time_ms: f64,
    pub errors: Vec<RecordError>,
}
