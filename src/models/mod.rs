//! Modelos del sistema
//!
//! Este módulo contiene todos los modelos de datos del motor de telemetría:
//! vehículos, lecturas, anomalías, KPIs horarios y lotes de ingesta.

pub mod anomaly;
pub mod batch;
pub mod kpi;
pub mod telemetry;
pub mod vehicle;

use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::errors::{validation_error, AppResult};

/// Intervalo semiabierto `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Self> {
        if end < start {
            return Err(validation_error("time_range", "end must not precede start"));
        }
        Ok(Self { start, end })
    }

    /// La hora completa que empieza en `hour_start`
    pub fn hour(hour_start: DateTime<Utc>) -> Self {
        Self {
            start: hour_start,
            end: hour_start + Duration::hours(1),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Página de resultados ordenados por tiempo, reanudable con `next_cursor`
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: usize = 500;
pub const MAX_PAGE_LIMIT: usize = 5000;

/// Límite efectivo de página: por defecto 500, entre 1 y 5000
pub fn page_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Timestamp en RFC 3339 con la precisión necesaria para reanudar sin pérdidas
pub fn format_cursor(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Inicio de la hora que contiene `ts`
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

/// Verificar que `ts` cae exactamente en el inicio de una hora
pub fn is_hour_aligned(ts: DateTime<Utc>) -> bool {
    floor_to_hour(ts) == ts
}
