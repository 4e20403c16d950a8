//! Tabla de KPIs horarios
//!
//! Una fila por `(vehicle_id, hour_start)`. Las filas son `Arc` inmutables:
//! reemplazar es cambiar el puntero bajo el lock del vehículo, así un lector
//! ve la fila anterior o la nueva, nunca una mezcla.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::models::kpi::{HourlyKpi, KpiRollup, RollupOutcome};
use crate::models::TimeRange;

type KpiSeries = BTreeMap<DateTime<Utc>, Arc<HourlyKpi>>;

/// Qué hacer con el candidato frente a la fila existente
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDecision {
    Keep(RollupOutcome),
    Replace(RollupOutcome),
}

#[derive(Default)]
pub struct KpiRepository {
    rows: DashMap<String, Arc<RwLock<KpiSeries>>>,
}

impl KpiRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self, vehicle_id: &str) -> Arc<RwLock<KpiSeries>> {
        if let Some(series) = self.rows.get(vehicle_id) {
            return series.clone();
        }
        self.rows
            .entry(vehicle_id.to_string())
            .or_default()
            .clone()
    }

    pub fn get(&self, vehicle_id: &str, hour_start: DateTime<Utc>) -> Option<Arc<HourlyKpi>> {
        let series = self.rows.get(vehicle_id)?.clone();
        let row = series.read().get(&hour_start).cloned();
        row
    }

    /// Decidir y, si corresponde, reemplazar bajo un mismo lock.
    ///
    /// Dos cálculos concurrentes de la misma hora se serializan aquí; el
    /// segundo ve la fila del primero.
    pub fn store_with<F>(&self, candidate: HourlyKpi, decide: F) -> KpiRollup
    where
        F: FnOnce(Option<&HourlyKpi>, &HourlyKpi) -> StoreDecision,
    {
        let series = self.series(&candidate.vehicle_id);
        let mut series = series.write();
        let existing = series.get(&candidate.hour_start).cloned();

        match (decide(existing.as_deref(), &candidate), existing) {
            (StoreDecision::Keep(outcome), Some(kpi)) => KpiRollup { kpi, outcome },
            (StoreDecision::Keep(_), None) | (StoreDecision::Replace(_), None) => {
                let kpi = Arc::new(candidate);
                series.insert(kpi.hour_start, kpi.clone());
                KpiRollup {
                    kpi,
                    outcome: RollupOutcome::Created,
                }
            }
            (StoreDecision::Replace(outcome), Some(_)) => {
                let kpi = Arc::new(candidate);
                series.insert(kpi.hour_start, kpi.clone());
                KpiRollup { kpi, outcome }
            }
        }
    }

    /// Reemplazo incondicional
    pub fn replace(&self, kpi: HourlyKpi) -> Arc<HourlyKpi> {
        self.store_with(kpi, |_, _| StoreDecision::Replace(RollupOutcome::Recomputed))
            .kpi
    }

    /// Filas del vehículo con `hour_start` dentro del rango
    pub fn range(&self, vehicle_id: &str, range: &TimeRange) -> Vec<Arc<HourlyKpi>> {
        if range.is_empty() {
            return Vec::new();
        }
        let Some(series) = self.rows.get(vehicle_id).map(|s| s.clone()) else {
            return Vec::new();
        };
        let rows: Vec<_> = series.read().range(range.start..range.end).map(|(_, kpi)| kpi.clone()).collect();
        rows
    }

    /// Borrar filas con `hour_start` anterior a `older_than`
    pub fn evict(&self, older_than: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for entry in self.rows.iter() {
            let mut series = entry.value().write();
            let keep = series.split_off(&older_than);
            removed += series.len();
            *series = keep;
        }
        if removed > 0 {
            tracing::info!("🧹 Retención de KPIs: {} filas anteriores a {} borradas", removed, older_than);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.rows.iter().map(|entry| entry.value().read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 4, h, 0, 0).unwrap()
    }

    fn kpi(vehicle_id: &str, h: u32, readings: u32) -> HourlyKpi {
        HourlyKpi {
            vehicle_id: vehicle_id.to_string(),
            hour_start: hour(h),
            hour_end: hour(h) + Duration::hours(1),
            total_readings: readings,
            distance_km: Decimal::ZERO,
            avg_speed_kph: Decimal::ZERO,
            max_speed_kph: Decimal::ZERO,
            idle_time_minutes: Decimal::ZERO,
            utilization_percentage: Decimal::ZERO,
            fuel_start_percentage: None,
            fuel_end_percentage: None,
            fuel_consumed_percentage: None,
            refuel_detected: false,
            anomaly_count: 0,
            input_fingerprint: readings as u64,
            computed_at: hour(h) + Duration::hours(2),
        }
    }

    #[test]
    fn test_store_with_creates_then_keeps() {
        let repo = KpiRepository::new();
        let first = repo.store_with(kpi("V1", 10, 3), |_, _| StoreDecision::Keep(RollupOutcome::Unchanged));
        assert_eq!(first.outcome, RollupOutcome::Created);

        let second = repo.store_with(kpi("V1", 10, 4), |_, _| StoreDecision::Keep(RollupOutcome::Stale));
        assert_eq!(second.outcome, RollupOutcome::Stale);
        assert_eq!(second.kpi.total_readings, 3);
        assert!(Arc::ptr_eq(&first.kpi, &second.kpi));
    }

    #[test]
    fn test_replace_swaps_row_atomically() {
        let repo = KpiRepository::new();
        repo.replace(kpi("V1", 10, 3));
        let held = repo.get("V1", hour(10)).unwrap();

        repo.replace(kpi("V1", 10, 5));
        assert_eq!(held.total_readings, 3);
        assert_eq!(repo.get("V1", hour(10)).unwrap().total_readings, 5);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_range_and_eviction() {
        let repo = KpiRepository::new();
        for h in 8..12 {
            repo.replace(kpi("V1", h, h));
        }
        let range = TimeRange::new(hour(9), hour(11)).unwrap();
        let hours: Vec<_> = repo.range("V1", &range).iter().map(|k| k.hour_start).collect();
        assert_eq!(hours, vec![hour(9), hour(10)]);

        assert_eq!(repo.evict(hour(10)), 2);
        assert_eq!(repo.len(), 2);
        assert!(repo.get("V1", hour(9)).is_none());
    }
}
