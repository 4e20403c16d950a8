//! Coordinador de ingesta
//!
//! Valida cada registro, resuelve el vehículo en el registro maestro y lo
//! envía al almacén de lecturas. Los errores por registro se cuentan y se
//! detallan sin abortar el lote; un fallo del almacén o del registro aborta
//! el resto del lote. En ambos casos la fila del ledger se cierra con los
//! contadores alcanzados y la duración.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use crate::config::StorageConfig;
use crate::models::batch::{BatchCounts, BatchResult, BatchStatus, RecordError};
use crate::models::format_cursor;
use crate::models::telemetry::{AppendOutcome, IngestionFormat, RawReading};
use crate::repositories::batch_repository::MAX_ERROR_DETAILS;
use crate::repositories::{BatchRepository, ReadingRepository, VehicleRegistry};
use crate::services::metrics_service::MetricsService;
use crate::services::payload_normalizer::{to_new_reading, NormalizedBatch, TelemetryPayload};
use crate::utils::errors::{AppError, AppResult};

pub struct IngestionService {
    readings: Arc<ReadingRepository>,
    batches: Arc<BatchRepository>,
    registry: Arc<dyn VehicleRegistry>,
    metrics: MetricsService,
    auto_register_vehicles: bool,
    max_batch_size: usize,
}

impl IngestionService {
    pub fn new(
        readings: Arc<ReadingRepository>,
        batches: Arc<BatchRepository>,
        registry: Arc<dyn VehicleRegistry>,
        metrics: MetricsService,
        config: &StorageConfig,
    ) -> Self {
        Self {
            readings,
            batches,
            registry,
            metrics,
            auto_register_vehicles: config.auto_register_vehicles,
            max_batch_size: config.max_batch_size,
        }
    }

    /// Ingerir un payload ya detectado
    pub async fn ingest(&self, payload: TelemetryPayload) -> AppResult<BatchResult> {
        self.ingest_batch(payload.normalize()).await
    }

    /// Ingerir registros crudos de un formato conocido
    pub async fn ingest_records(
        &self,
        records: Vec<RawReading>,
        format: IngestionFormat,
    ) -> AppResult<BatchResult> {
        self.ingest_batch(NormalizedBatch::from_records(records, format)).await
    }

    async fn ingest_batch(&self, batch: NormalizedBatch) -> AppResult<BatchResult> {
        let started = Instant::now();
        let format = batch.format;
        let batch_timestamp = batch.batch_timestamp.unwrap_or_else(Utc::now);
        let total = u32::try_from(batch.records.len()).unwrap_or(u32::MAX);
        let batch_id = self
            .batches
            .open(format, batch_timestamp, total, batch.payload_metadata);

        // Lote demasiado grande: fila abortada sin tocar el almacén
        if batch.records.len() > self.max_batch_size {
            let reason = format!(
                "batch of {} records exceeds the limit of {}",
                batch.records.len(),
                self.max_batch_size
            );
            let refused = RecordError {
                index: 0,
                vehicle_id: None,
                timestamp: None,
                reason: reason.clone(),
            };
            let counts = BatchCounts {
                total,
                ..BatchCounts::default()
            };
            let elapsed = started.elapsed();
            self.close_ledger_row(
                batch_id,
                BatchStatus::Aborted,
                counts,
                elapsed.as_secs_f64() * 1000.0,
                vec![refused],
            );
            tracing::warn!("⚠️ Lote {} rechazado: {}", batch_id, reason);
            return Err(AppError::BadRequest(reason));
        }

        tracing::info!(
            "📥 Lote {} recibido: {} registros en formato {}",
            batch_id,
            total,
            format
        );

        let processing_metadata = json!({
            "batch_timestamp": format_cursor(batch_timestamp),
            "original_format": format.as_str(),
            "processed_at": format_cursor(Utc::now()),
        });

        let mut counts = BatchCounts {
            total,
            ..BatchCounts::default()
        };
        let mut errors: Vec<RecordError> = Vec::new();
        let mut known_vehicles: HashMap<String, bool> = HashMap::new();
        let mut failure: Option<AppError> = None;

        for (index, record) in batch.records.into_iter().enumerate() {
            let raw = match record {
                Ok(raw) => raw,
                Err(reason) => {
                    counts.error += 1;
                    errors.push(RecordError {
                        index,
                        vehicle_id: None,
                        timestamp: None,
                        reason,
                    });
                    continue;
                }
            };
            let reject = |reason: String| RecordError {
                index,
                vehicle_id: raw.vehicle_id_hint(),
                timestamp: raw.timestamp_hint(),
                reason,
            };

            let reading = match to_new_reading(&raw, format, Some(batch_id), processing_metadata.clone()) {
                Ok(reading) => reading,
                Err(reason) => {
                    counts.error += 1;
                    errors.push(reject(reason));
                    continue;
                }
            };
            if let Err(validation) = reading.check() {
                counts.error += 1;
                errors.push(reject(validation.to_string()));
                continue;
            }

            match self.resolve_vehicle(&reading.vehicle_id, &mut known_vehicles).await {
                Ok(true) => {}
                Ok(false) => {
                    counts.error += 1;
                    errors.push(reject(AppError::Referential(reading.vehicle_id.clone()).to_string()));
                    continue;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }

            match self.readings.append(reading) {
                Ok(AppendOutcome::Inserted { .. }) => counts.processed += 1,
                Ok(AppendOutcome::Duplicate) => counts.duplicate += 1,
                Ok(AppendOutcome::Rejected { reason }) => {
                    counts.error += 1;
                    errors.push(reject(reason.to_string()));
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        let processing_time_ms = elapsed.as_secs_f64() * 1000.0;
        let status = if failure.is_some() {
            BatchStatus::Aborted
        } else {
            BatchStatus::Completed
        };
        self.close_ledger_row(batch_id, status, counts, processing_time_ms, errors.clone());
        self.metrics.record_batch(&counts, elapsed.as_secs_f64());
        self.metrics.set_reading_chunks(self.readings.chunk_count());

        if let Some(cause) = failure {
            tracing::error!(
                "❌ Lote {} abortado tras {} procesadas, {} duplicadas, {} errores: {}",
                batch_id,
                counts.processed,
                counts.duplicate,
                counts.error,
                cause
            );
            return Err(AppError::ServiceUnavailable(format!(
                "batch {} aborted after {} processed, {} duplicate, {} error readings: {}",
                batch_id, counts.processed, counts.duplicate, counts.error, cause
            )));
        }

        tracing::info!(
            "✅ Lote {} completado: {} procesadas, {} duplicadas, {} errores en {:.2} ms",
            batch_id,
            counts.processed,
            counts.duplicate,
            counts.error,
            processing_time_ms
        );

        errors.truncate(MAX_ERROR_DETAILS);
        Ok(BatchResult {
            batch_id,
            format,
            batch_timestamp,
            total: counts.total,
            processed: counts.processed,
            duplicate: counts.duplicate,
            error: counts.error,
            processing_time_ms,
            errors,
        })
    }

    /// Cerrar la fila del ledger; un fallo aquí se registra y no corta el lote
    fn close_ledger_row(
        &self,
        batch_id: u64,
        status: BatchStatus,
        counts: BatchCounts,
        processing_time_ms: f64,
        errors: Vec<RecordError>,
    ) {
        if let Err(e) = self
            .batches
            .finalize(batch_id, status, counts, processing_time_ms, errors)
        {
            tracing::error!("❌ No se pudo cerrar el lote {} en el ledger: {}", batch_id, e);
        }
    }

    /// `true` si el vehículo existe (o se acaba de registrar); cacheado por lote
    async fn resolve_vehicle(
        &self,
        vehicle_id: &str,
        known: &mut HashMap<String, bool>,
    ) -> AppResult<bool> {
        if let Some(&exists) = known.get(vehicle_id) {
            return Ok(exists);
        }

        let exists = if self.registry.get(vehicle_id).await?.is_some() {
            true
        } else if self.auto_register_vehicles {
            let (_, created) = self.registry.register_if_absent(vehicle_id).await?;
            if created {
                tracing::info!("🚚 Vehículo {} registrado automáticamente", vehicle_id);
            }
            true
        } else {
            false
        };

        known.insert(vehicle_id.to_string(), exists);
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryVehicleRegistry;
    use serde_json::json;

    fn service(auto_register: bool) -> (IngestionService, Arc<ReadingRepository>, Arc<BatchRepository>) {
        let config = StorageConfig {
            auto_register_vehicles: auto_register,
            max_batch_size: 5,
            ..StorageConfig::default()
        };
        let readings = Arc::new(ReadingRepository::new(&config));
        let batches = Arc::new(BatchRepository::new());
        let service = IngestionService::new(
            readings.clone(),
            batches.clone(),
            Arc::new(InMemoryVehicleRegistry::new()),
            MetricsService::new().unwrap(),
            &config,
        );
        (service, readings, batches)
    }

    fn raw(vehicle_id: &str, minute: u32, fuel: f64) -> RawReading {
        RawReading::new(
            vehicle_id,
            &format!("2025-09-04T12:{:02}:00Z", minute),
            22.57,
            88.36,
            30.0,
            fuel,
        )
    }

    #[tokio::test]
    async fn test_record_errors_do_not_abort_batch() {
        let (service, readings, batches) = service(true);
        let mut missing = raw("V1", 2, 50.0);
        missing.latitude = None;

        let result = service
            .ingest_records(
                vec![raw("V1", 0, 50.0), raw("V1", 1, 100.0001), missing, raw("V1", 0, 50.0)],
                IngestionFormat::RawArray,
            )
            .await
            .unwrap();

        assert_eq!((result.processed, result.duplicate, result.error), (1, 1, 2));
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].index, 1);
        assert_eq!(result.errors[1].vehicle_id.as_deref(), Some("V1"));
        assert_eq!(readings.len(), 1);

        let row = batches.get(result.batch_id).unwrap();
        assert_eq!(row.status, BatchStatus::Completed);
        assert!(row.processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_unknown_vehicle_without_auto_register() {
        let (service, readings, _) = service(false);
        let result = service
            .ingest_records(vec![raw("GHOST", 0, 50.0)], IngestionFormat::SingleReading)
            .await
            .unwrap();
        assert_eq!(result.error, 1);
        assert!(result.errors[0].reason.contains("GHOST"));
        assert!(readings.is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_aborts_batch_with_ledger_row() {
        let (service, readings, batches) = service(true);
        readings.close();

        let err = service
            .ingest_records(vec![raw("V1", 0, 50.0)], IngestionFormat::Legacy)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));

        let row = &batches.recent(1)[0];
        assert_eq!(row.status, BatchStatus::Aborted);
        assert_eq!(row.processed_readings, 0);
        assert!(row.processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_oversized_batch_is_refused() {
        let (service, _, batches) = service(true);
        let records = (0..6).map(|m| raw("V1", m, 50.0)).collect();
        let err = service
            .ingest_records(records, IngestionFormat::RawArray)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let rows = batches.recent(10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, BatchStatus::Aborted);
        assert_eq!(rows[0].total_readings, 6);
        assert_eq!(rows[0].processed_readings, 0);
        assert!(rows[0].error_details[0].reason.contains("exceeds the limit of 5"));
        assert!(rows[0].processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_ledger_conflict_keeps_abort_error_and_metrics() {
        let (service, readings, batches) = service(true);
        readings.close();

        let err = service
            .ingest_records(vec![raw("V1", 0, 50.0)], IngestionFormat::Legacy)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert!(service.metrics.render().unwrap().contains("telemetry_batches_total 1"));

        // Un segundo cierre choca con el ledger y no altera la fila
        let batch_id = batches.recent(1)[0].batch_id;
        service.close_ledger_row(
            batch_id,
            BatchStatus::Completed,
            BatchCounts { total: 1, processed: 1, ..BatchCounts::default() },
            1.0,
            Vec::new(),
        );
        let row = batches.get(batch_id).unwrap();
        assert_eq!(row.status, BatchStatus::Aborted);
        assert_eq!(row.processed_readings, 0);
    }

    #[tokio::test]
    async fn test_payload_metadata_reaches_readings() {
        let (service, readings, _) = service(true);
        let payload = TelemetryPayload::detect(json!({
            "timestamp": "2025-09-04T12:30:00Z",
            "batch_size": 1,
            "telemetry_data": [{
                "vehicle_id": "V9",
                "timestamp": "2025-09-04T12:00:00Z",
                "latitude": 1.0,
                "longitude": 2.0,
                "speed_kph": 10,
                "fuel_percentage": 40
            }]
        }))
        .unwrap();
        let result = service.ingest(payload).await.unwrap();
        assert_eq!(result.format, IngestionFormat::SimulationEngine);

        let range = crate::models::TimeRange::hour(result.batch_timestamp - chrono::Duration::minutes(30));
        let stored = readings.query("V9", &range);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].batch_id, Some(result.batch_id));
        assert_eq!(stored[0].processing_metadata["original_format"], json!("simulation_engine"));
        assert_eq!(stored[0].processing_metadata["batch_timestamp"], json!("2025-09-04T12:30:00Z"));
    }
}
