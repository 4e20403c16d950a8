//! Ledger de lotes de ingesta
//!
//! Una fila por llamada de ingesta con id incremental. La fila nace en
//! `processing` y se cierra una única vez (`completed` o `aborted`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::models::batch::{BatchCounts, BatchStatus, IngestionBatch, RecordError};
use crate::models::telemetry::IngestionFormat;
use crate::utils::errors::{not_found_error, AppError, AppResult};

/// Detalles de error guardados por lote
pub const MAX_ERROR_DETAILS: usize = 50;

/// Totales acumulados del ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSummary {
    pub total_batches: u64,
    pub completed_batches: u64,
    pub aborted_batches: u64,
    pub batches_with_errors: u64,
    pub batches_by_format: BTreeMap<IngestionFormat, u64>,
    pub total_readings: u64,
    pub processed_readings: u64,
    pub duplicate_readings: u64,
    pub error_readings: u64,
    pub avg_processing_time_ms: Option<f64>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

pub struct BatchRepository {
    next_id: AtomicU64,
    batches: RwLock<BTreeMap<u64, IngestionBatch>>,
}

impl Default for BatchRepository {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            batches: RwLock::new(BTreeMap::new()),
        }
    }
}

impl BatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abrir un lote en estado `processing`
    pub fn open(
        &self,
        format: IngestionFormat,
        batch_timestamp: DateTime<Utc>,
        total_readings: u32,
        payload_metadata: Value,
    ) -> u64 {
        let batch_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let batch = IngestionBatch {
            batch_id,
            batch_timestamp,
            ingestion_format: format,
            status: BatchStatus::Processing,
            total_readings,
            processed_readings: 0,
            duplicate_readings: 0,
            error_readings: 0,
            processing_time_ms: None,
            created_at: Utc::now(),
            completed_at: None,
            payload_metadata,
            error_details: Vec::new(),
        };
        self.batches.write().insert(batch_id, batch);
        batch_id
    }

    /// Cerrar el lote con sus contadores finales; solo una vez
    pub fn finalize(
        &self,
        batch_id: u64,
        status: BatchStatus,
        counts: BatchCounts,
        processing_time_ms: f64,
        mut errors: Vec<RecordError>,
    ) -> AppResult<IngestionBatch> {
        if status == BatchStatus::Processing {
            return Err(AppError::Internal("a batch cannot be finalized as processing".to_string()));
        }

        let mut batches = self.batches.write();
        let batch = batches
            .get_mut(&batch_id)
            .ok_or_else(|| not_found_error("Ingestion batch", &batch_id.to_string()))?;
        if batch.status != BatchStatus::Processing {
            return Err(AppError::Conflict(format!(
                "batch {} is already {:?}",
                batch_id, batch.status
            )));
        }

        errors.truncate(MAX_ERROR_DETAILS);
        batch.status = status;
        batch.total_readings = counts.total;
        batch.processed_readings = counts.processed;
        batch.duplicate_readings = counts.duplicate;
        batch.error_readings = counts.error;
        batch.processing_time_ms = Some(processing_time_ms);
        batch.completed_at = Some(Utc::now());
        batch.error_details = errors;
        Ok(batch.clone())
    }

    pub fn get(&self, batch_id: u64) -> Option<IngestionBatch> {
        self.batches.read().get(&batch_id).cloned()
    }

    /// Lotes más recientes primero
    pub fn recent(&self, limit: usize) -> Vec<IngestionBatch> {
        self.batches.read().values().rev().take(limit).cloned().collect()
    }

    /// Borrar filas cerradas creadas antes de `older_than`; las abiertas se quedan
    pub fn evict(&self, older_than: DateTime<Utc>) -> usize {
        let mut batches = self.batches.write();
        let before = batches.len();
        batches.retain(|_, batch| {
            batch.status == BatchStatus::Processing || batch.created_at >= older_than
        });
        let evicted = before - batches.len();
        if evicted > 0 {
            tracing::debug!("Ledger: {} lotes anteriores a {} eliminados", evicted, older_than);
        }
        evicted
    }

    pub fn summary(&self) -> LedgerSummary {
        let batches = self.batches.read();
        let mut summary = LedgerSummary::default();
        let mut timed = 0u64;
        let mut time_sum = 0.0;

        for batch in batches.values() {
            summary.total_batches += 1;
            *summary.batches_by_format.entry(batch.ingestion_format).or_default() += 1;
            match batch.status {
                BatchStatus::Completed => summary.completed_batches += 1,
                BatchStatus::Aborted => summary.aborted_batches += 1,
                BatchStatus::Processing => {}
            }
            if batch.error_readings > 0 {
                summary.batches_with_errors += 1;
            }
            summary.total_readings += u64::from(batch.total_readings);
            summary.processed_readings += u64::from(batch.processed_readings);
            summary.duplicate_readings += u64::from(batch.duplicate_readings);
            summary.error_readings += u64::from(batch.error_readings);
            if let Some(ms) = batch.processing_time_ms {
                timed += 1;
                time_sum += ms;
            }
            if batch.status == BatchStatus::Completed {
                summary.last_completed_at = summary.last_completed_at.max(batch.completed_at);
            }
        }

        summary.avg_processing_time_ms = (timed > 0).then(|| time_sum / timed as f64);
        summary
    }
}
