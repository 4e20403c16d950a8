//! Configuración del motor de almacenamiento
//!
//! Anchos de chunk, retención, umbrales de agregación y política de
//! recálculo de KPIs.

use std::str::FromStr;

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::environment::parse_var;

/// Política de recálculo cuando cambian los datos de una hora ya agregada
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputePolicy {
    /// `compute` reemplaza la fila si la huella de entrada cambió
    Automatic,
    /// Solo `recompute` reemplaza; `compute` devuelve la fila marcada como obsoleta
    Explicit,
}

impl FromStr for RecomputePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(RecomputePolicy::Automatic),
            "explicit" | "explicit_only" => Ok(RecomputePolicy::Explicit),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown recompute policy '{0}' (expected 'automatic' or 'explicit')")]
pub struct UnknownPolicy(String);

/// Configuración del almacenamiento de series temporales
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub reading_chunk_width: Duration,
    pub anomaly_chunk_width: Duration,
    /// `None` desactiva la retención automática
    pub retention: Option<Duration>,
    pub idle_speed_threshold_kph: f64,
    pub refuel_threshold_pct: f64,
    pub kpi_grace_period: Duration,
    pub kpi_backfill_hours: u32,
    pub recompute_policy: RecomputePolicy,
    pub auto_register_vehicles: bool,
    pub fuel_theft_threshold_pct: f64,
    pub scheduler_interval: std::time::Duration,
    pub max_batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reading_chunk_width: Duration::hours(1),
            anomaly_chunk_width: Duration::hours(24),
            retention: Some(Duration::days(30)),
            idle_speed_threshold_kph: 1.0,
            refuel_threshold_pct: 1.0,
            kpi_grace_period: Duration::minutes(5),
            kpi_backfill_hours: 3,
            recompute_policy: RecomputePolicy::Automatic,
            auto_register_vehicles: true,
            fuel_theft_threshold_pct: 5.0,
            scheduler_interval: std::time::Duration::from_secs(60),
            max_batch_size: 10_000,
        }
    }
}

impl StorageConfig {
    /// Leer configuración desde variables de entorno (con valores por defecto)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let chunk_minutes: i64 = parse_var("READING_CHUNK_MINUTES", 60)?;
        let anomaly_hours: i64 = parse_var("ANOMALY_CHUNK_HOURS", 24)?;
        let retention_days: i64 = parse_var("RETENTION_DAYS", 30)?;
        let grace_minutes: i64 = parse_var("KPI_GRACE_MINUTES", 5)?;
        let interval_secs: u64 = parse_var("SCHEDULER_INTERVAL_SECS", 60)?;

        anyhow::ensure!(chunk_minutes > 0, "READING_CHUNK_MINUTES must be positive");
        anyhow::ensure!(anomaly_hours > 0, "ANOMALY_CHUNK_HOURS must be positive");
        anyhow::ensure!(retention_days >= 0, "RETENTION_DAYS must not be negative");
        anyhow::ensure!(grace_minutes >= 0, "KPI_GRACE_MINUTES must not be negative");
        anyhow::ensure!(interval_secs > 0, "SCHEDULER_INTERVAL_SECS must be positive");

        Ok(Self {
            reading_chunk_width: Duration::minutes(chunk_minutes),
            anomaly_chunk_width: Duration::hours(anomaly_hours),
            retention: (retention_days > 0).then(|| Duration::days(retention_days)),
            idle_speed_threshold_kph: parse_var(
                "IDLE_SPEED_THRESHOLD_KPH",
                defaults.idle_speed_threshold_kph,
            )?,
            refuel_threshold_pct: parse_var("REFUEL_THRESHOLD_PCT", defaults.refuel_threshold_pct)?,
            kpi_grace_period: Duration::minutes(grace_minutes),
            kpi_backfill_hours: parse_var("KPI_BACKFILL_HOURS", defaults.kpi_backfill_hours)?,
            recompute_policy: parse_var("KPI_RECOMPUTE_POLICY", defaults.recompute_policy)?,
            auto_register_vehicles: parse_var(
                "AUTO_REGISTER_VEHICLES",
                defaults.auto_register_vehicles,
            )?,
            fuel_theft_threshold_pct: parse_var(
                "FUEL_THEFT_THRESHOLD_PCT",
                defaults.fuel_theft_threshold_pct,
            )?,
            scheduler_interval: std::time::Duration::from_secs(interval_secs),
            max_batch_size: parse_var("MAX_BATCH_SIZE", defaults.max_batch_size)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recompute_policy_parsing() {
        assert_eq!("automatic".parse::<RecomputePolicy>().unwrap(), RecomputePolicy::Automatic);
        assert_eq!("EXPLICIT".parse::<RecomputePolicy>().unwrap(), RecomputePolicy::Explicit);
        assert!("sometimes".parse::<RecomputePolicy>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.reading_chunk_width, Duration::hours(1));
        assert!(config.anomaly_chunk_width > config.reading_chunk_width);
        assert_eq!(config.retention, Some(Duration::days(30)));
        assert!(config.auto_register_vehicles);
    }
}
