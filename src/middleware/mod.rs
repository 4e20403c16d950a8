//! Middleware del sistema
//!
//! Por ahora solo CORS; el resto de capas (trazas, compresión) se montan
//! directamente en el router.

pub mod cors;

pub use cors::*;
