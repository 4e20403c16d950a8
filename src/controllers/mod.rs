//! Controllers
//!
//! Lógica de cada endpoint: parseo de parámetros y llamada al servicio.

pub mod anomaly_controller;
pub mod kpi_controller;
pub mod telemetry_controller;
pub mod vehicle_controller;
