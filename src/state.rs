//! Shared application state
//!
//! Este módulo define el estado compartido de la aplicación que se pasa
//! a través del router de Axum: almacenes, servicios y configuración.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::environment::EnvironmentConfig;
use crate::config::StorageConfig;
use crate::repositories::{
    AnomalyRepository, BatchRepository, InMemoryVehicleRegistry, KpiRepository, ReadingRepository,
    VehicleRegistry,
};
use crate::services::{
    AnomalyService, DetectionService, IngestionService, KpiService, MetricsService, RetentionJob,
    Scheduler,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EnvironmentConfig>,
    pub storage: Arc<StorageConfig>,
    pub registry: Arc<dyn VehicleRegistry>,
    pub readings: Arc<ReadingRepository>,
    pub anomaly_store: Arc<AnomalyRepository>,
    pub kpi_store: Arc<KpiRepository>,
    pub batches: Arc<BatchRepository>,
    pub ingestion: Arc<IngestionService>,
    pub kpis: Arc<KpiService>,
    pub anomalies: Arc<AnomalyService>,
    pub detection: Arc<DetectionService>,
    pub metrics: MetricsService,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: EnvironmentConfig,
        storage: StorageConfig,
        registry: Arc<dyn VehicleRegistry>,
    ) -> anyhow::Result<Self> {
        let metrics = MetricsService::new()?;
        let readings = Arc::new(ReadingRepository::new(&storage));
        let anomaly_store = Arc::new(AnomalyRepository::new(&storage));
        let kpi_store = Arc::new(KpiRepository::new());
        let batches = Arc::new(BatchRepository::new());

        let ingestion = Arc::new(IngestionService::new(
            readings.clone(),
            batches.clone(),
            registry.clone(),
            metrics.clone(),
            &storage,
        ));
        let kpis = Arc::new(KpiService::new(
            readings.clone(),
            anomaly_store.clone(),
            kpi_store.clone(),
            registry.clone(),
            metrics.clone(),
            &storage,
        ));
        let anomalies = Arc::new(AnomalyService::new(
            anomaly_store.clone(),
            registry.clone(),
            metrics.clone(),
        ));
        let detection = Arc::new(DetectionService::new(
            readings.clone(),
            registry.clone(),
            anomalies.clone(),
            &storage,
        ));

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            registry,
            readings,
            anomaly_store,
            kpi_store,
            batches,
            ingestion,
            kpis,
            anomalies,
            detection,
            metrics,
            started_at: Utc::now(),
        })
    }

    /// Estado completamente en memoria (registro incluido)
    pub fn in_memory(storage: StorageConfig) -> anyhow::Result<Self> {
        Self::new(
            EnvironmentConfig::default(),
            storage,
            Arc::new(InMemoryVehicleRegistry::new()),
        )
    }

    /// Tarea de retención, si hay horizonte configurado
    pub fn retention_job(&self) -> Option<RetentionJob> {
        self.storage.retention.map(|retention| {
            RetentionJob::new(
                self.readings.clone(),
                self.anomaly_store.clone(),
                self.kpi_store.clone(),
                self.batches.clone(),
                self.metrics.clone(),
                retention,
            )
        })
    }

    pub fn start_scheduler(&self) -> Scheduler {
        Scheduler::start(
            self.storage.scheduler_interval,
            self.kpis.clone(),
            self.detection.clone(),
            self.retention_job(),
        )
    }
}
