//! Modelos de KPIs
//!
//! Fila de rollup horario por vehículo y estadísticas ad-hoc por periodo.
//! Los valores numéricos usan `Decimal` con dos decimales, igual que las
//! columnas `NUMERIC(x,2)` de la tabla `hourly_vehicle_kpis`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// KPI horario - identidad (vehicle_id, hour_start)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyKpi {
    pub vehicle_id: String,
    pub hour_start: DateTime<Utc>,
    pub hour_end: DateTime<Utc>,
    pub total_readings: u32,
    pub distance_km: Decimal,
    pub avg_speed_kph: Decimal,
    pub max_speed_kph: Decimal,
    pub idle_time_minutes: Decimal,
    pub utilization_percentage: Decimal,
    pub fuel_start_percentage: Option<Decimal>,
    pub fuel_end_percentage: Option<Decimal>,
    pub fuel_consumed_percentage: Option<Decimal>,
    pub refuel_detected: bool,
    pub anomaly_count: u32,
    /// Huella de las lecturas y anomalías de la ventana
    #[serde(skip)]
    pub input_fingerprint: u64,
    pub computed_at: DateTime<Utc>,
}

/// Qué hizo `compute` con la fila existente
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupOutcome {
    /// No había fila para la ventana
    Created,
    /// La fila existente coincide con los datos actuales
    Unchanged,
    /// Los datos cambiaron desde el último cálculo y la fila se reemplazó
    Recomputed,
    /// Los datos cambiaron pero la política exige `recompute` explícito
    Stale,
}

/// Resultado de `compute`
#[derive(Debug, Clone, Serialize)]
pub struct KpiRollup {
    pub kpi: Arc<HourlyKpi>,
    pub outcome: RollupOutcome,
}

/// Estadísticas de un vehículo para un periodo arbitrario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleStats {
    pub vehicle_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_readings: u32,
    pub total_distance_km: Decimal,
    pub avg_speed_kph: Decimal,
    pub max_speed_kph: Decimal,
    pub total_idle_time_minutes: Decimal,
    pub utilization_percentage: Decimal,
    pub fuel_consumed_percentage: Option<Decimal>,
    pub fuel_efficiency_kmpl: Option<Decimal>,
    pub anomaly_count: u32,
}
