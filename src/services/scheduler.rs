//! Tareas periódicas del motor
//!
//! Tres bucles independientes (rollup de KPIs, detección y retención) que
//! comparten un canal `watch` de apagado. Un pase que falla se registra y
//! el bucle sigue con el siguiente tick.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::repositories::{
    AnomalyRepository, BatchRepository, EvictionReport, KpiRepository, ReadingRepository,
};
use crate::services::detection_service::DetectionService;
use crate::services::kpi_service::KpiService;
use crate::services::metrics_service::MetricsService;

/// Resultado de un pase de retención
#[derive(Debug, Clone, Serialize)]
pub struct RetentionReport {
    pub readings: EvictionReport,
    pub anomalies: EvictionReport,
    pub kpi_rows_evicted: usize,
    pub batches_evicted: usize,
}

/// Poda todo lo anterior a `now - retention` en los almacenes y el ledger
pub struct RetentionJob {
    readings: Arc<ReadingRepository>,
    anomalies: Arc<AnomalyRepository>,
    kpis: Arc<KpiRepository>,
    batches: Arc<BatchRepository>,
    metrics: MetricsService,
    retention: Duration,
}

impl RetentionJob {
    pub fn new(
        readings: Arc<ReadingRepository>,
        anomalies: Arc<AnomalyRepository>,
        kpis: Arc<KpiRepository>,
        batches: Arc<BatchRepository>,
        metrics: MetricsService,
        retention: Duration,
    ) -> Self {
        Self {
            readings,
            anomalies,
            kpis,
            batches,
            metrics,
            retention,
        }
    }

    pub fn run(&self, now: DateTime<Utc>) -> RetentionReport {
        let cutoff = now - self.retention;
        let report = RetentionReport {
            readings: self.readings.evict(cutoff),
            anomalies: self.anomalies.evict(cutoff),
            kpi_rows_evicted: self.kpis.evict(cutoff),
            batches_evicted: self.batches.evict(cutoff),
        };
        self.metrics.set_reading_chunks(self.readings.chunk_count());

        if report.readings.chunks_evicted > 0
            || report.anomalies.chunks_evicted > 0
            || report.batches_evicted > 0
        {
            tracing::info!(
                "🧹 Retención hasta {}: {} chunks de lecturas ({} filas), {} de anomalías, {} KPIs, {} lotes",
                cutoff,
                report.readings.chunks_evicted,
                report.readings.rows_evicted,
                report.anomalies.chunks_evicted,
                report.kpi_rows_evicted,
                report.batches_evicted
            );
        }
        report
    }
}

pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Arrancar los bucles; la retención solo si hay horizonte configurado
    pub fn start(
        interval: StdDuration,
        kpis: Arc<KpiService>,
        detection: Arc<DetectionService>,
        retention: Option<RetentionJob>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();

        handles.push(spawn_loop("rollup", interval, shutdown.subscribe(), move || {
            let kpis = Arc::clone(&kpis);
            async move {
                kpis.roll_up_closed_hours(Utc::now()).await;
            }
        }));

        handles.push(spawn_loop("detección", interval, shutdown.subscribe(), move || {
            let detection = Arc::clone(&detection);
            async move {
                detection.run_pass(Utc::now()).await;
            }
        }));

        if let Some(job) = retention {
            let job = Arc::new(job);
            handles.push(spawn_loop("retención", interval, shutdown.subscribe(), move || {
                let job = Arc::clone(&job);
                async move {
                    job.run(Utc::now());
                }
            }));
        }

        tracing::info!("⏱️ Scheduler iniciado: {} tareas cada {:?}", handles.len(), interval);
        Self { shutdown, handles }
    }

    /// Señalar el apagado y esperar a que terminen los pases en curso
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("❌ Tarea del scheduler terminó con error: {}", e);
            }
        }
        tracing::info!("⏱️ Scheduler detenido");
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: StdDuration,
    mut shutdown: watch::Receiver<bool>,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Un panic dentro del pase no debe matar el bucle
                    if let Err(e) = tokio::spawn(pass()).await {
                        tracing::error!("❌ Pase de {} falló: {}", name, e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Bucle de {} terminado", name);
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::models::batch::{BatchCounts, BatchStatus};
    use crate::models::telemetry::{IngestionFormat, NewReading};
    use crate::models::TimeRange;
    use chrono::TimeZone;
    use serde_json::json;

    fn reading(ts: DateTime<Utc>) -> NewReading {
        NewReading {
            vehicle_id: "V1".to_string(),
            timestamp: ts,
            latitude: 22.57,
            longitude: 88.36,
            speed_kph: 20.0,
            fuel_percentage: 50.0,
            ingestion_format: IngestionFormat::Legacy,
            batch_id: None,
            processing_metadata: json!({}),
        }
    }

    #[test]
    fn test_retention_evicts_old_chunks_only() {
        let config = StorageConfig::default();
        let readings = Arc::new(ReadingRepository::new(&config));
        let job = RetentionJob::new(
            readings.clone(),
            Arc::new(AnomalyRepository::new(&config)),
            Arc::new(KpiRepository::new()),
            Arc::new(BatchRepository::new()),
            MetricsService::new().unwrap(),
            Duration::days(1),
        );

        let now = Utc.with_ymd_and_hms(2025, 9, 10, 12, 0, 0).unwrap();
        readings.append(reading(now - Duration::days(3))).unwrap();
        readings.append(reading(now - Duration::hours(2))).unwrap();

        let report = job.run(now);
        assert_eq!(report.readings.chunks_evicted, 1);
        assert_eq!(report.readings.rows_evicted, 1);
        assert_eq!(readings.len(), 1);

        let old = TimeRange {
            start: now - Duration::days(4),
            end: now - Duration::days(2),
        };
        assert!(readings.query("V1", &old).is_empty());
    }

    #[test]
    fn test_retention_prunes_closed_batches() {
        let config = StorageConfig::default();
        let batches = Arc::new(BatchRepository::new());
        let job = RetentionJob::new(
            Arc::new(ReadingRepository::new(&config)),
            Arc::new(AnomalyRepository::new(&config)),
            Arc::new(KpiRepository::new()),
            batches.clone(),
            MetricsService::new().unwrap(),
            Duration::days(1),
        );
        let closed = batches.open(IngestionFormat::RawArray, Utc::now(), 2, json!({}));
        batches
            .finalize(closed, BatchStatus::Completed, BatchCounts::default(), 1.0, Vec::new())
            .unwrap();
        let open = batches.open(IngestionFormat::RawArray, Utc::now(), 2, json!({}));

        // Dos días después la fila cerrada cae fuera del horizonte
        let report = job.run(Utc::now() + Duration::days(2));
        assert_eq!(report.batches_evicted, 1);
        assert!(batches.get(closed).is_none());
        assert!(batches.get(open).is_some());
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        let handle = spawn_loop("prueba", StdDuration::from_millis(10), rx, move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(counter.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }
}
