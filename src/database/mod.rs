//! Módulo de base de datos
//!
//! Particionado por chunks de tiempo para las series en memoria y conexión
//! opcional a PostgreSQL para el registro de vehículos.

pub mod chunk;
pub mod connection;

pub use chunk::{Chunk, ChunkExpired, ChunkId, ChunkMap, ChunkWidth};
pub use connection::connect_registry;
