//! Modelo de Vehicle
//!
//! Registro maestro por vehículo. Mapea a la tabla `telemetry.vehicles`
//! (clave primaria `vehicle_id`). Nunca se borra: se desactiva con `active`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::utils::validation::validate_not_empty;

pub const DEFAULT_TANK_CAPACITY_LITERS: f64 = 500.0;
pub const DEFAULT_MILEAGE_KMPL: f64 = 4.0;
pub const DEFAULT_VEHICLE_TYPE: &str = "TRUCK";

/// Vehicle principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub tank_capacity_liters: f64,
    pub mileage_kmpl: f64,
    pub vehicle_type: String,
    pub active: bool,
    pub vehicle_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    /// Vehículo con valores por defecto, como el que se crea al verlo por primera vez
    pub fn with_defaults(vehicle_id: &str) -> Self {
        let now = Utc::now();
        Self {
            vehicle_id: vehicle_id.to_string(),
            tank_capacity_liters: DEFAULT_TANK_CAPACITY_LITERS,
            mileage_kmpl: DEFAULT_MILEAGE_KMPL,
            vehicle_type: DEFAULT_VEHICLE_TYPE.to_string(),
            active: true,
            vehicle_metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request para registrar o reemplazar un vehículo
#[derive(Debug, Deserialize, Validate)]
pub struct UpsertVehicleRequest {
    #[validate(length(min = 1, max = 50), custom = "validate_not_empty")]
    pub vehicle_id: String,

    #[validate(range(min = 0.0, max = 100000.0))]
    pub tank_capacity_liters: Option<f64>,

    #[validate(range(min = 0.0, max = 1000.0))]
    pub mileage_kmpl: Option<f64>,

    #[validate(length(min = 1, max = 50))]
    pub vehicle_type: Option<String>,

    pub active: Option<bool>,

    pub vehicle_metadata: Option<Value>,
}

/// Request para actualizar un vehículo existente
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateVehicleRequest {
    #[validate(range(min = 0.0, max = 100000.0))]
    pub tank_capacity_liters: Option<f64>,

    #[validate(range(min = 0.0, max = 1000.0))]
    pub mileage_kmpl: Option<f64>,

    #[validate(length(min = 1, max = 50))]
    pub vehicle_type: Option<String>,

    pub active: Option<bool>,

    pub vehicle_metadata: Option<Value>,
}

impl UpsertVehicleRequest {
    /// Construir el vehículo resultante; conserva `created_at` si ya existía
    pub fn into_vehicle(self, existing: Option<&Vehicle>) -> Vehicle {
        let now = Utc::now();
        Vehicle {
            created_at: existing.map(|v| v.created_at).unwrap_or(now),
            updated_at: now,
            tank_capacity_liters: self
                .tank_capacity_liters
                .unwrap_or(DEFAULT_TANK_CAPACITY_LITERS),
            mileage_kmpl: self.mileage_kmpl.unwrap_or(DEFAULT_MILEAGE_KMPL),
            vehicle_type: self
                .vehicle_type
                .unwrap_or_else(|| DEFAULT_VEHICLE_TYPE.to_string()),
            active: self.active.unwrap_or(true),
            vehicle_metadata: self.vehicle_metadata.unwrap_or_else(|| json!({})),
            vehicle_id: self.vehicle_id,
        }
    }
}

impl UpdateVehicleRequest {
    /// Aplicar los campos presentes sobre el vehículo actual
    pub fn apply(self, mut vehicle: Vehicle) -> Vehicle {
        if let Some(capacity) = self.tank_capacity_liters {
            vehicle.tank_capacity_liters = capacity;
        }
        if let Some(mileage) = self.mileage_kmpl {
            vehicle.mileage_kmpl = mileage;
        }
        if let Some(vehicle_type) = self.vehicle_type {
            vehicle.vehicle_type = vehicle_type;
        }
        if let Some(active) = self.active {
            vehicle.active = active;
        }
        if let Some(metadata) = self.vehicle_metadata {
            vehicle.vehicle_metadata = metadata;
        }
        vehicle.updated_at = Utc::now();
        vehicle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_created_at() {
        let original = Vehicle::with_defaults("V1");
        let request = UpsertVehicleRequest {
            vehicle_id: "V1".to_string(),
            tank_capacity_liters: Some(300.0),
            mileage_kmpl: None,
            vehicle_type: Some("VAN".to_string()),
            active: None,
            vehicle_metadata: None,
        };
        let updated = request.into_vehicle(Some(&original));
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(updated.tank_capacity_liters, 300.0);
        assert_eq!(updated.mileage_kmpl, DEFAULT_MILEAGE_KMPL);
        assert_eq!(updated.vehicle_type, "VAN");
        assert!(updated.active);
    }

    #[test]
    fn test_update_applies_only_present_fields() {
        let original = Vehicle::with_defaults("V1");
        let update = UpdateVehicleRequest {
            active: Some(false),
            ..Default::default()
        };
        let updated = update.apply(original.clone());
        assert!(!updated.active);
        assert_eq!(updated.vehicle_type, original.vehicle_type);
        assert!(updated.updated_at >= original.updated_at);
    }

    #[test]
    fn test_upsert_validation() {
        let request = UpsertVehicleRequest {
            vehicle_id: String::new(),
            tank_capacity_liters: Some(-1.0),
            mileage_kmpl: None,
            vehicle_type: None,
            active: None,
            vehicle_metadata: None,
        };
        assert!(request.validate().is_err());

        let blank = UpsertVehicleRequest {
            vehicle_id: "   ".to_string(),
            tank_capacity_liters: None,
            mileage_kmpl: None,
            vehicle_type: None,
            active: None,
            vehicle_metadata: None,
        };
        let errors = blank.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("vehicle_id"));
    }
}
