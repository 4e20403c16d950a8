use serde::Deserialize;

// Filtros del listado de vehículos
#[derive(Debug, Default, Deserialize)]
pub struct VehicleFilters {
    pub active_only: Option<bool>,
}
