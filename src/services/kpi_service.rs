//! Agregador de KPIs
//!
//! Calcula la fila horaria de un vehículo a partir de las lecturas y
//! anomalías de la ventana `[hour_start, hour_start + 1h)`. El cálculo es
//! una función pura de esos datos; el servicio no guarda estado propio y
//! puede ejecutarse en paralelo entre vehículos.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{RecomputePolicy, StorageConfig};
use crate::models::anomaly::AnomalyEvent;
use crate::models::kpi::{HourlyKpi, KpiRollup, RollupOutcome, VehicleStats};
use crate::models::telemetry::Reading;
use crate::models::vehicle::DEFAULT_TANK_CAPACITY_LITERS;
use crate::models::{floor_to_hour, is_hour_aligned, TimeRange};
use crate::repositories::kpi_repository::StoreDecision;
use crate::repositories::{AnomalyRepository, KpiRepository, ReadingRepository, VehicleRegistry};
use crate::services::metrics_service::MetricsService;
use crate::utils::errors::{not_found_error, validation_error, AppError, AppResult};
use crate::utils::geo::haversine_km;

/// Cifras de una ventana de lecturas ordenadas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSummary {
    pub total_readings: u32,
    pub distance_km: f64,
    pub avg_speed_kph: f64,
    pub max_speed_kph: f64,
    pub idle_minutes: f64,
    pub fuel_start: Option<f64>,
    pub fuel_end: Option<f64>,
    pub fuel_consumed: Option<f64>,
    pub refuel_detected: bool,
}

/// Resumir lecturas ordenadas por timestamp
pub fn summarize(readings: &[Reading], idle_threshold_kph: f64, refuel_threshold_pct: f64) -> WindowSummary {
    let Some(first) = readings.first() else {
        return WindowSummary::default();
    };
    let last = readings.last().unwrap_or(first);

    let mut summary = WindowSummary {
        total_readings: u32::try_from(readings.len()).unwrap_or(u32::MAX),
        ..WindowSummary::default()
    };

    let mut speed_sum = 0.0;
    for reading in readings {
        speed_sum += reading.speed_kph;
        summary.max_speed_kph = summary.max_speed_kph.max(reading.speed_kph);
    }
    summary.avg_speed_kph = speed_sum / readings.len() as f64;

    for pair in readings.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        summary.distance_km += haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
        if a.speed_kph <= idle_threshold_kph && b.speed_kph <= idle_threshold_kph {
            summary.idle_minutes += (b.timestamp - a.timestamp).num_milliseconds() as f64 / 60_000.0;
        }
        if b.fuel_percentage - a.fuel_percentage > refuel_threshold_pct {
            summary.refuel_detected = true;
        }
    }

    summary.fuel_start = Some(first.fuel_percentage);
    summary.fuel_end = Some(last.fuel_percentage);
    summary.fuel_consumed = Some((first.fuel_percentage - last.fuel_percentage).max(0.0));
    summary
}

/// Dos decimales, como las columnas `NUMERIC(x,2)`
fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

/// Porcentaje de la ventana en movimiento
fn utilization(window_minutes: f64, idle_minutes: f64, total_readings: u32) -> f64 {
    if total_readings == 0 || window_minutes <= 0.0 {
        return 0.0;
    }
    ((window_minutes - idle_minutes) / window_minutes * 100.0).clamp(0.0, 100.0)
}

/// Huella determinista de las entradas de una ventana
fn fingerprint(vehicle_id: &str, readings: &[Reading], anomalies: &[AnomalyEvent]) -> u64 {
    let mut hasher = DefaultHasher::new();
    vehicle_id.hash(&mut hasher);
    readings.len().hash(&mut hasher);
    for r in readings {
        r.timestamp.hash(&mut hasher);
        r.latitude.to_bits().hash(&mut hasher);
        r.longitude.to_bits().hash(&mut hasher);
        r.speed_kph.to_bits().hash(&mut hasher);
        r.fuel_percentage.to_bits().hash(&mut hasher);
    }
    let ids: BTreeSet<_> = anomalies.iter().map(|a| a.id).collect();
    ids.hash(&mut hasher);
    hasher.finish()
}

/// Fila horaria a partir de los datos de la ventana
pub fn build_hourly_kpi(
    vehicle_id: &str,
    hour_start: DateTime<Utc>,
    readings: &[Reading],
    anomalies: &[AnomalyEvent],
    idle_threshold_kph: f64,
    refuel_threshold_pct: f64,
    computed_at: DateTime<Utc>,
) -> HourlyKpi {
    let summary = summarize(readings, idle_threshold_kph, refuel_threshold_pct);
    HourlyKpi {
        vehicle_id: vehicle_id.to_string(),
        hour_start,
        hour_end: hour_start + Duration::hours(1),
        total_readings: summary.total_readings,
        distance_km: to_decimal(summary.distance_km),
        avg_speed_kph: to_decimal(summary.avg_speed_kph),
        max_speed_kph: to_decimal(summary.max_speed_kph),
        idle_time_minutes: to_decimal(summary.idle_minutes),
        utilization_percentage: to_decimal(utilization(60.0, summary.idle_minutes, summary.total_readings)),
        fuel_start_percentage: summary.fuel_start.map(to_decimal),
        fuel_end_percentage: summary.fuel_end.map(to_decimal),
        fuel_consumed_percentage: summary.fuel_consumed.map(to_decimal),
        refuel_detected: summary.refuel_detected,
        anomaly_count: u32::try_from(anomalies.len()).unwrap_or(u32::MAX),
        input_fingerprint: fingerprint(vehicle_id, readings, anomalies),
        computed_at,
    }
}

/// Resultado de un pase del scheduler
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollupReport {
    pub hours: Vec<DateTime<Utc>>,
    pub vehicles: usize,
    pub created: u32,
    pub unchanged: u32,
    pub recomputed: u32,
    pub stale: u32,
    pub failed: u32,
}

impl RollupReport {
    fn absorb(&mut self, result: &AppResult<KpiRollup>) {
        match result {
            Ok(rollup) => match rollup.outcome {
                RollupOutcome::Created => self.created += 1,
                RollupOutcome::Unchanged => self.unchanged += 1,
                RollupOutcome::Recomputed => self.recomputed += 1,
                RollupOutcome::Stale => self.stale += 1,
            },
            Err(_) => self.failed += 1,
        }
    }
}

pub struct KpiService {
    readings: Arc<ReadingRepository>,
    anomalies: Arc<AnomalyRepository>,
    kpis: Arc<KpiRepository>,
    registry: Arc<dyn VehicleRegistry>,
    metrics: MetricsService,
    idle_speed_threshold_kph: f64,
    refuel_threshold_pct: f64,
    grace_period: Duration,
    backfill_hours: u32,
    policy: RecomputePolicy,
}

impl KpiService {
    pub fn new(
        readings: Arc<ReadingRepository>,
        anomalies: Arc<AnomalyRepository>,
        kpis: Arc<KpiRepository>,
        registry: Arc<dyn VehicleRegistry>,
        metrics: MetricsService,
        config: &StorageConfig,
    ) -> Self {
        Self {
            readings,
            anomalies,
            kpis,
            registry,
            metrics,
            idle_speed_threshold_kph: config.idle_speed_threshold_kph,
            refuel_threshold_pct: config.refuel_threshold_pct,
            grace_period: config.kpi_grace_period,
            backfill_hours: config.kpi_backfill_hours,
            policy: config.recompute_policy,
        }
    }

    /// Calcular (idempotente) la hora de un vehículo
    pub fn compute(&self, vehicle_id: &str, hour_start: DateTime<Utc>) -> AppResult<KpiRollup> {
        self.compute_as_of(vehicle_id, hour_start, Utc::now())
    }

    pub fn compute_as_of(
        &self,
        vehicle_id: &str,
        hour_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<KpiRollup> {
        let window = self.closed_window(vehicle_id, hour_start, now)?;
        let candidate = self.build(vehicle_id, &window, now);
        let policy = self.policy;

        let rollup = self.kpis.store_with(candidate, |existing, candidate| match existing {
            None => StoreDecision::Replace(RollupOutcome::Created),
            Some(row) if row.input_fingerprint == candidate.input_fingerprint => {
                StoreDecision::Keep(RollupOutcome::Unchanged)
            }
            Some(_) => match policy {
                RecomputePolicy::Automatic => StoreDecision::Replace(RollupOutcome::Recomputed),
                RecomputePolicy::Explicit => StoreDecision::Keep(RollupOutcome::Stale),
            },
        });

        match rollup.outcome {
            RollupOutcome::Recomputed => tracing::info!(
                "🔁 KPI {} {} recalculado: los datos de la ventana cambiaron",
                vehicle_id,
                hour_start
            ),
            RollupOutcome::Stale => tracing::warn!(
                "⚠️ KPI {} {} desactualizado; requiere recompute explícito",
                vehicle_id,
                hour_start
            ),
            _ => tracing::debug!("📊 KPI {} {}: {:?}", vehicle_id, hour_start, rollup.outcome),
        }
        self.metrics.record_rollup(rollup.outcome);
        Ok(rollup)
    }

    /// Reemplazo explícito e incondicional de la fila
    pub fn recompute(&self, vehicle_id: &str, hour_start: DateTime<Utc>) -> AppResult<Arc<HourlyKpi>> {
        let now = Utc::now();
        let window = self.closed_window(vehicle_id, hour_start, now)?;
        let kpi = self.kpis.replace(self.build(vehicle_id, &window, now));
        self.metrics.record_rollup(RollupOutcome::Recomputed);
        tracing::info!("🔁 KPI {} {} recalculado por solicitud", vehicle_id, hour_start);
        Ok(kpi)
    }

    /// Filas ya materializadas en el rango
    pub fn kpis_in_range(&self, vehicle_id: &str, range: &TimeRange) -> Vec<Arc<HourlyKpi>> {
        self.kpis.range(vehicle_id, range)
    }

    fn closed_window(
        &self,
        vehicle_id: &str,
        hour_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<TimeRange> {
        if vehicle_id.trim().is_empty() {
            return Err(validation_error("vehicle_id", "must not be empty"));
        }
        if !is_hour_aligned(hour_start) {
            return Err(validation_error("hour_start", "must be aligned to the start of an hour"));
        }
        let window = TimeRange::hour(hour_start);
        let closes_at = window.end + self.grace_period;
        if closes_at > now {
            return Err(AppError::WindowOpen(format!(
                "hour {} for vehicle {} closes at {}",
                hour_start, vehicle_id, closes_at
            )));
        }
        Ok(window)
    }

    fn build(&self, vehicle_id: &str, window: &TimeRange, computed_at: DateTime<Utc>) -> HourlyKpi {
        let readings = self.readings.query(vehicle_id, window);
        let anomalies = self.anomalies.query(vehicle_id, window, None);
        build_hourly_kpi(
            vehicle_id,
            window.start,
            &readings,
            &anomalies,
            self.idle_speed_threshold_kph,
            self.refuel_threshold_pct,
            computed_at,
        )
    }

    /// Horas cerradas que cubre un pase: las últimas `backfill_hours`
    pub fn closed_hours(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let latest = floor_to_hour(now - self.grace_period - Duration::hours(1));
        (0..i64::from(self.backfill_hours))
            .rev()
            .map(|i| latest - Duration::hours(i))
            .collect()
    }

    /// Pase del scheduler: todas las horas cerradas recientes, vehículos en paralelo
    pub async fn roll_up_closed_hours(self: &Arc<Self>, now: DateTime<Utc>) -> RollupReport {
        let hours = self.closed_hours(now);
        let mut report = RollupReport {
            hours: hours.clone(),
            ..RollupReport::default()
        };
        let (Some(&first), Some(&last)) = (hours.first(), hours.last()) else {
            return report;
        };

        let mut vehicles: BTreeSet<String> = match self.registry.list(true).await {
            Ok(list) => list.into_iter().map(|v| v.vehicle_id).collect(),
            Err(e) => {
                tracing::warn!("⚠️ Registro de vehículos no disponible para el rollup: {}", e);
                BTreeSet::new()
            }
        };
        let span = TimeRange {
            start: first,
            end: last + Duration::hours(1),
        };
        vehicles.extend(self.readings.vehicles_in_range(&span));
        report.vehicles = vehicles.len();

        let tasks = vehicles.into_iter().map(|vehicle_id| {
            let service = Arc::clone(self);
            let hours = hours.clone();
            tokio::spawn(async move {
                hours
                    .iter()
                    .map(|hour| service.compute_as_of(&vehicle_id, *hour, now))
                    .collect::<Vec<_>>()
            })
        });

        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(results) => results.iter().for_each(|r| report.absorb(r)),
                Err(e) => {
                    tracing::error!("❌ Tarea de rollup falló: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "📊 Rollup: {} vehículos, {} creadas, {} sin cambios, {} recalculadas, {} obsoletas, {} fallidas",
            report.vehicles,
            report.created,
            report.unchanged,
            report.recomputed,
            report.stale,
            report.failed
        );
        report
    }

    /// Estadísticas ad-hoc de un vehículo en un periodo
    pub async fn vehicle_stats(&self, vehicle_id: &str, range: &TimeRange) -> AppResult<VehicleStats> {
        let readings = self.readings.query(vehicle_id, range);
        if readings.is_empty() {
            return Err(not_found_error("Readings for vehicle", vehicle_id));
        }
        let tank_capacity = self
            .registry
            .get(vehicle_id)
            .await?
            .map(|v| v.tank_capacity_liters)
            .unwrap_or(DEFAULT_TANK_CAPACITY_LITERS);

        let summary = summarize(&readings, self.idle_speed_threshold_kph, self.refuel_threshold_pct);
        let window_minutes = range.duration().num_milliseconds() as f64 / 60_000.0;
        let fuel_efficiency = summary.fuel_consumed.and_then(|pct| {
            let liters = tank_capacity * pct / 100.0;
            (liters > 0.0).then(|| summary.distance_km / liters)
        });
        let anomaly_count = self.anomalies.query(vehicle_id, range, None).len();

        Ok(VehicleStats {
            vehicle_id: vehicle_id.to_string(),
            period_start: range.start,
            period_end: range.end,
            total_readings: summary.total_readings,
            total_distance_km: to_decimal(summary.distance_km),
            avg_speed_kph: to_decimal(summary.avg_speed_kph),
            max_speed_kph: to_decimal(summary.max_speed_kph),
            total_idle_time_minutes: to_decimal(summary.idle_minutes),
            utilization_percentage: to_decimal(utilization(
                window_minutes,
                summary.idle_minutes,
                summary.total_readings,
            )),
            fuel_consumed_percentage: summary.fuel_consumed.map(to_decimal),
            fuel_efficiency_kmpl: fuel_efficiency.map(to_decimal),
            anomaly_count: u32::try_from(anomaly_count).unwrap_or(u32::MAX),
        })
    }
}
