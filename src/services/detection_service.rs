//! Detección de anomalías sobre la telemetría reciente
//!
//! Los detectores son puros: reciben el vehículo y sus lecturas ordenadas y
//! devuelven eventos candidatos. El servicio recorre la ventana reciente,
//! descarta lo ya registrado y persiste el resto vía `AnomalyService`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;

use crate::config::StorageConfig;
use crate::models::anomaly::{AnomalyType, NewAnomalyEvent};
use crate::models::telemetry::Reading;
use crate::models::vehicle::Vehicle;
use crate::models::TimeRange;
use crate::repositories::{ReadingRepository, VehicleRegistry};
use crate::services::anomaly_service::AnomalyService;

/// Ventana que revisa cada pase del detector
pub const DETECTION_LOOKBACK_HOURS: i64 = 2;

pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// `readings` llega en orden ascendente de timestamp
    fn detect(&self, vehicle: &Vehicle, readings: &[Reading]) -> Vec<NewAnomalyEvent>;
}

/// Caída de combustible con el vehículo detenido
#[derive(Debug, Clone, Copy)]
pub struct FuelDropDetector {
    pub threshold_pct: f64,
    pub idle_speed_kph: f64,
}

impl FuelDropDetector {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            threshold_pct: config.fuel_theft_threshold_pct,
            idle_speed_kph: config.idle_speed_threshold_kph,
        }
    }

    fn confidence(&self, drop_pct: f64) -> f64 {
        let score = 0.6 + (drop_pct - self.threshold_pct) * 0.05;
        (score.clamp(0.0, 0.99) * 100.0).round() / 100.0
    }

    fn severity(drop_pct: f64) -> u8 {
        match drop_pct {
            d if d >= 25.0 => 5,
            d if d >= 15.0 => 4,
            d if d >= 10.0 => 3,
            d if d >= 7.5 => 2,
            _ => 1,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl AnomalyDetector for FuelDropDetector {
    fn name(&self) -> &'static str {
        "fuel_drop"
    }

    fn detect(&self, vehicle: &Vehicle, readings: &[Reading]) -> Vec<NewAnomalyEvent> {
        readings
            .windows(2)
            .filter_map(|pair| {
                let (before, after) = (&pair[0], &pair[1]);
                let stopped = before.speed_kph <= self.idle_speed_kph && after.speed_kph <= self.idle_speed_kph;
                let drop_pct = before.fuel_percentage - after.fuel_percentage;
                if !stopped || drop_pct < self.threshold_pct {
                    return None;
                }

                Some(NewAnomalyEvent {
                    vehicle_id: vehicle.vehicle_id.clone(),
                    timestamp: after.timestamp,
                    event_type: AnomalyType::FuelTheft,
                    confidence_score: self.confidence(drop_pct),
                    severity: Self::severity(drop_pct),
                    details: json!({
                        "fuel_pct_before": before.fuel_percentage,
                        "fuel_pct_after": after.fuel_percentage,
                        "theft_percentage": round2(drop_pct),
                        "liters_stolen": round2(drop_pct / 100.0 * vehicle.tank_capacity_liters),
                        "detector": self.name(),
                    }),
                })
            })
            .collect()
    }
}

/// Resultado de un pase de detección
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub vehicles: usize,
    pub detected: u32,
    pub recorded: u32,
    pub skipped_existing: u32,
    pub failed: u32,
}

pub struct DetectionService {
    readings: Arc<ReadingRepository>,
    registry: Arc<dyn VehicleRegistry>,
    anomalies: Arc<AnomalyService>,
    detectors: Vec<Box<dyn AnomalyDetector>>,
    lookback: Duration,
}

impl DetectionService {
    pub fn new(
        readings: Arc<ReadingRepository>,
        registry: Arc<dyn VehicleRegistry>,
        anomalies: Arc<AnomalyService>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            readings,
            registry,
            anomalies,
            detectors: vec![Box::new(FuelDropDetector::new(config))],
            lookback: Duration::hours(DETECTION_LOOKBACK_HOURS),
        }
    }

    /// Un pase sobre `[now - lookback, now)`
    pub async fn run_pass(&self, now: DateTime<Utc>) -> DetectionReport {
        let window = TimeRange {
            start: now - self.lookback,
            end: now,
        };
        let vehicle_ids = self.readings.vehicles_in_range(&window);
        let mut report = DetectionReport {
            vehicles: vehicle_ids.len(),
            ..DetectionReport::default()
        };

        for vehicle_id in vehicle_ids {
            let vehicle = match self.registry.get(&vehicle_id).await {
                Ok(Some(vehicle)) => vehicle,
                Ok(None) => Vehicle::with_defaults(&vehicle_id),
                Err(e) => {
                    tracing::warn!("⚠️ Registro no disponible para {}: {}", vehicle_id, e);
                    report.failed += 1;
                    continue;
                }
            };
            let readings = self.readings.query(&vehicle_id, &window);

            for detector in &self.detectors {
                for event in detector.detect(&vehicle, &readings) {
                    report.detected += 1;
                    if self.anomalies.exists(&event.vehicle_id, event.timestamp, event.event_type) {
                        report.skipped_existing += 1;
                        continue;
                    }
                    match self.anomalies.record(event).await {
                        Ok(_) => report.recorded += 1,
                        Err(e) => {
                            tracing::warn!("⚠️ Detector {} no pudo registrar evento: {}", detector.name(), e);
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.recorded > 0 || report.failed > 0 {
            tracing::info!(
                "🔎 Detección: {} vehículos, {} nuevas anomalías, {} ya registradas, {} fallidas",
                report.vehicles,
                report.recorded,
                report.skipped_existing,
                report.failed
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::telemetry::{IngestionFormat, NewReading};
    use crate::repositories::{AnomalyRepository, InMemoryVehicleRegistry};
    use crate::services::metrics_service::MetricsService;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 4, h, m, 0).unwrap()
    }

    fn new_reading(ts: DateTime<Utc>, speed: f64, fuel: f64) -> NewReading {
        NewReading {
            vehicle_id: "V1".to_string(),
            timestamp: ts,
            latitude: 22.57,
            longitude: 88.36,
            speed_kph: speed,
            fuel_percentage: fuel,
            ingestion_format: IngestionFormat::RawArray,
            batch_id: None,
            processing_metadata: json!({}),
        }
    }

    fn reading(ts: DateTime<Utc>, speed: f64, fuel: f64) -> Reading {
        Reading::from_new(new_reading(ts, speed, fuel), ts)
    }

    fn detector() -> FuelDropDetector {
        FuelDropDetector {
            threshold_pct: 5.0,
            idle_speed_kph: 1.0,
        }
    }

    #[test]
    fn test_drop_while_stopped_is_flagged() {
        let vehicle = Vehicle::with_defaults("V1");
        let readings = vec![
            reading(at(10, 0), 0.0, 70.0),
            reading(at(10, 1), 0.0, 58.0),
            reading(at(10, 2), 0.0, 57.5),
        ];
        let events = detector().detect(&vehicle, &readings);
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.timestamp, at(10, 1));
        assert_eq!(event.event_type, AnomalyType::FuelTheft);
        assert_eq!(event.severity, 3);
        assert!(event.confidence_score > 0.8 && event.confidence_score <= 0.99);
        assert_eq!(event.details["theft_percentage"], json!(12.0));
        assert_eq!(event.details["liters_stolen"], json!(60.0));
    }

    #[test]
    fn test_consumption_while_moving_is_ignored() {
        let vehicle = Vehicle::with_defaults("V1");
        let readings = vec![reading(at(10, 0), 60.0, 70.0), reading(at(10, 1), 0.0, 50.0)];
        assert!(detector().detect(&vehicle, &readings).is_empty());

        let small = vec![reading(at(10, 0), 0.0, 70.0), reading(at(10, 1), 0.0, 66.0)];
        assert!(detector().detect(&vehicle, &small).is_empty());
    }

    #[tokio::test]
    async fn test_pass_does_not_duplicate_events() {
        let config = StorageConfig::default();
        let readings = Arc::new(ReadingRepository::new(&config));
        let registry = Arc::new(InMemoryVehicleRegistry::new());
        registry.register_if_absent("V1").await.unwrap();
        let anomaly_store = Arc::new(AnomalyRepository::new(&config));
        let anomalies = Arc::new(AnomalyService::new(
            anomaly_store.clone(),
            registry.clone(),
            MetricsService::new().unwrap(),
        ));
        let service = DetectionService::new(readings.clone(), registry, anomalies, &config);

        readings.append(new_reading(at(10, 0), 0.0, 80.0)).unwrap();
        readings.append(new_reading(at(10, 5), 0.0, 60.0)).unwrap();

        let first = service.run_pass(at(11, 0)).await;
        assert_eq!((first.vehicles, first.recorded), (1, 1));

        let second = service.run_pass(at(11, 1)).await;
        assert_eq!((second.recorded, second.skipped_existing), (0, 1));
        assert_eq!(anomaly_store.len(), 1);
    }
}
