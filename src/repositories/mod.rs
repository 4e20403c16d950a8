//! Repositorios
//!
//! Almacenes del motor: registro de vehículos, lecturas y anomalías
//! particionadas por chunks, tabla de KPIs horarios y ledger de lotes.

pub mod anomaly_repository;
pub mod batch_repository;
pub mod kpi_repository;
pub mod reading_repository;
pub mod vehicle_repository;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use anomaly_repository::AnomalyRepository;
pub use batch_repository::BatchRepository;
pub use kpi_repository::KpiRepository;
pub use reading_repository::ReadingRepository;
pub use vehicle_repository::{InMemoryVehicleRegistry, PgVehicleRegistry, VehicleRegistry};

/// Resultado de un pase de retención sobre un almacén
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub cutoff: DateTime<Utc>,
    pub chunks_evicted: usize,
    pub rows_evicted: u64,
}
