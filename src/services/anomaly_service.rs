//! Servicio de anomalías
//!
//! Punto de entrada validado al almacén de anomalías: límites de confianza y
//! severidad, y vehículo existente en el registro.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::models::anomaly::{AnomalyEvent, AnomalyType, NewAnomalyEvent};
use crate::models::{Page, TimeRange};
use crate::repositories::anomaly_repository::AnomalyKey;
use crate::repositories::{AnomalyRepository, VehicleRegistry};
use crate::services::metrics_service::MetricsService;
use crate::utils::errors::{not_found_error, AppError, AppResult};
use crate::utils::validation::validate_finite;

pub struct AnomalyService {
    anomalies: Arc<AnomalyRepository>,
    registry: Arc<dyn VehicleRegistry>,
    metrics: MetricsService,
}

impl AnomalyService {
    pub fn new(
        anomalies: Arc<AnomalyRepository>,
        registry: Arc<dyn VehicleRegistry>,
        metrics: MetricsService,
    ) -> Self {
        Self {
            anomalies,
            registry,
            metrics,
        }
    }

    /// Registrar un evento del detector
    pub async fn record(&self, new: NewAnomalyEvent) -> AppResult<Uuid> {
        let mut errors = match new.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        if let Err(e) = validate_finite(new.confidence_score) {
            errors.add("confidence_score", e);
        }
        if !errors.errors().is_empty() {
            return Err(AppError::Validation(errors));
        }

        if self.registry.get(&new.vehicle_id).await?.is_none() {
            return Err(AppError::Referential(new.vehicle_id));
        }

        let event = AnomalyEvent::from_new(new, Utc::now());
        let (vehicle_id, event_type, confidence) =
            (event.vehicle_id.clone(), event.event_type, event.confidence_score);
        let id = self.anomalies.insert(event)?;
        self.metrics.record_anomaly();

        tracing::info!(
            "🚨 Anomalía {} registrada para {} (confianza {:.2})",
            event_type,
            vehicle_id,
            confidence
        );
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> AppResult<AnomalyEvent> {
        self.anomalies
            .get(id)
            .ok_or_else(|| not_found_error("Anomaly event", &id.to_string()))
    }

    pub fn query(
        &self,
        vehicle_id: &str,
        range: &TimeRange,
        event_type: Option<AnomalyType>,
    ) -> Vec<AnomalyEvent> {
        self.anomalies.query(vehicle_id, range, event_type)
    }

    pub fn query_page(
        &self,
        vehicle_id: &str,
        range: &TimeRange,
        event_type: Option<AnomalyType>,
        after: Option<AnomalyKey>,
        limit: usize,
    ) -> Page<AnomalyEvent> {
        self.anomalies
            .query_page(vehicle_id, range, event_type, after, limit)
    }

    /// Alertas de toda la flota, las más recientes primero
    pub fn feed(
        &self,
        range: &TimeRange,
        event_type: Option<AnomalyType>,
        vehicle_id: Option<&str>,
        limit: usize,
    ) -> Vec<AnomalyEvent> {
        self.anomalies.feed(range, event_type, vehicle_id, limit)
    }

    /// ¿Ya hay un evento de ese tipo para el vehículo en ese instante?
    pub fn exists(&self, vehicle_id: &str, timestamp: DateTime<Utc>, event_type: AnomalyType) -> bool {
        self.anomalies.exists(vehicle_id, timestamp, event_type)
    }

    /// `true` si este llamado hizo la transición a procesado
    pub fn mark_processed(&self, id: Uuid) -> AppResult<bool> {
        let transitioned = self.anomalies.mark_processed(id)?;
        if transitioned {
            tracing::debug!("Anomalía {} marcada como procesada", id);
        }
        Ok(transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryVehicleRegistry;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    async fn service() -> AnomalyService {
        let registry = Arc::new(InMemoryVehicleRegistry::new());
        registry.register_if_absent("V1").await.unwrap();
        AnomalyService::new(
            Arc::new(AnomalyRepository::with_chunk_width(Duration::hours(24))),
            registry,
            MetricsService::new().unwrap(),
        )
    }

    fn event(vehicle_id: &str, confidence: f64, severity: u8) -> NewAnomalyEvent {
        NewAnomalyEvent {
            vehicle_id: vehicle_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 9, 4, 10, 30, 0).unwrap(),
            event_type: AnomalyType::FuelTheft,
            confidence_score: confidence,
            severity,
            details: json!({"fuel_pct_before": 70.0}),
        }
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let service = service().await;
        let id = service.record(event("V1", 0.9, 4)).await.unwrap();
        let stored = service.get(id).unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.severity, 4);
    }

    #[tokio::test]
    async fn test_bounds_and_unknown_vehicle_are_rejected() {
        let service = service().await;
        assert!(matches!(
            service.record(event("V1", 1.5, 3)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.record(event("V1", f64::NAN, 3)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.record(event("V1", 0.5, 0)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.record(event("NOPE", 0.5, 3)).await,
            Err(AppError::Referential(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_processed_once() {
        let service = service().await;
        let id = service.record(event("V1", 0.7, 2)).await.unwrap();
        assert!(service.mark_processed(id).unwrap());
        assert!(!service.mark_processed(id).unwrap());
        assert!(matches!(
            service.mark_processed(Uuid::new_v4()),
            Err(AppError::NotFound(_))
        ));
    }
}
