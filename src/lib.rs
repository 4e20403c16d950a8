//! Motor de ingesta y agregación de telemetría de flota
//!
//! Lecturas GPS/velocidad/combustible particionadas en chunks de tiempo,
//! anomalías derivadas y KPIs horarios materializados, expuestos por HTTP.

pub mod config;
pub mod controllers;
pub mod database;
pub mod dto;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

pub use routes::create_router;
pub use state::AppState;
