//! DTOs de la API HTTP
//!
//! Parámetros de consulta y formas de respuesta. Las entidades del dominio
//! se serializan tal cual; aquí solo vive lo propio del transporte.

pub mod anomaly_dto;
pub mod common;
pub mod kpi_dto;
pub mod telemetry_dto;
pub mod vehicle_dto;

pub use common::{ApiResponse, PageResponse};
