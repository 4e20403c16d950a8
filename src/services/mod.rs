//! Services module
//!
//! Este módulo contiene la lógica de negocio del motor: normalización e
//! ingesta de lotes, agregación horaria, anomalías, detección, métricas y
//! las tareas periódicas.

pub mod anomaly_service;
pub mod detection_service;
pub mod ingestion_service;
pub mod kpi_service;
pub mod metrics_service;
pub mod payload_normalizer;
pub mod scheduler;

pub use anomaly_service::AnomalyService;
pub use detection_service::{AnomalyDetector, DetectionService, FuelDropDetector};
pub use ingestion_service::IngestionService;
pub use kpi_service::KpiService;
pub use metrics_service::MetricsService;
pub use payload_normalizer::TelemetryPayload;
pub use scheduler::{RetentionJob, Scheduler};
