//! Configuración del proyecto
//!
//! Este módulo contiene la configuración de base de datos, variables de entorno
//! y parámetros del motor de almacenamiento.

pub mod database;
pub mod environment;
pub mod storage;

pub use environment::*;
pub use storage::{RecomputePolicy, StorageConfig};
