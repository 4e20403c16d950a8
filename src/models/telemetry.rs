//! Modelos de telemetría
//!
//! Lectura canónica (`Reading`), su forma previa al almacenamiento
//! (`NewReading`), el registro crudo recibido de los productores
//! (`RawReading`) y el resultado de un `append`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::utils::validation::{validate_coordinates, validate_finite, validate_non_negative};

/// Formato de ingesta - mapea al ENUM ingestion_format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionFormat {
    SimulationEngine,
    Legacy,
    RawArray,
    SingleReading,
}

impl IngestionFormat {
    pub const ALL: [IngestionFormat; 4] = [
        IngestionFormat::SimulationEngine,
        IngestionFormat::Legacy,
        IngestionFormat::RawArray,
        IngestionFormat::SingleReading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionFormat::SimulationEngine => "simulation_engine",
            IngestionFormat::Legacy => "legacy",
            IngestionFormat::RawArray => "raw_array",
            IngestionFormat::SingleReading => "single_reading",
        }
    }
}

impl fmt::Display for IngestionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        IngestionFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == normalized)
            .ok_or_else(|| format!("unknown ingestion format '{}'", s))
    }
}

/// Lectura validable antes de entrar al almacén
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReading {
    #[validate(length(min = 1, max = 50))]
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    pub speed_kph: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub fuel_percentage: f64,
    pub ingestion_format: IngestionFormat,
    pub batch_id: Option<u64>,
    #[serde(default)]
    pub processing_metadata: Value,
}

impl NewReading {
    /// Validación completa: rangos declarados + valores finitos
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        for (field, value) in [
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("speed_kph", self.speed_kph),
            ("fuel_percentage", self.fuel_percentage),
        ] {
            if let Err(e) = validate_finite(value) {
                errors.add(field, e);
            }
        }
        if self.latitude.is_finite() && self.longitude.is_finite() {
            if let Err(e) = validate_coordinates(self.latitude, self.longitude) {
                errors.add("position", e);
            }
        }
        if let Err(e) = validate_non_negative(self.speed_kph) {
            errors.add("speed_kph", e);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Lectura almacenada - inmutable tras su inserción
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kph: f64,
    pub fuel_percentage: f64,
    pub ingested_at: DateTime<Utc>,
    pub ingestion_format: IngestionFormat,
    pub batch_id: Option<u64>,
    pub processing_metadata: Value,
}

impl Reading {
    pub fn from_new(new: NewReading, ingested_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vehicle_id: new.vehicle_id,
            timestamp: new.timestamp,
            latitude: new.latitude,
            longitude: new.longitude,
            speed_kph: new.speed_kph,
            fuel_percentage: new.fuel_percentage,
            ingested_at,
            ingestion_format: new.ingestion_format,
            batch_id: new.batch_id,
            processing_metadata: new.processing_metadata,
        }
    }
}

/// Motivo de rechazo de un `append`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// Campo fuera de rango o ausente
    Invalid(String),
    /// El chunk destino ya fue desalojado por retención
    Expired(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Invalid(msg) => write!(f, "invalid reading: {}", msg),
            RejectReason::Expired(msg) => write!(f, "outside retention horizon: {}", msg),
        }
    }
}

/// Resultado de `append`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AppendOutcome {
    Inserted { id: Uuid },
    Duplicate,
    Rejected { reason: RejectReason },
}

impl AppendOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, AppendOutcome::Inserted { .. })
    }
}

/// Registro tal como lo envía un productor, antes de normalizar.
///
/// Los campos se guardan como JSON sin tipar: los productores legacy envían
/// números como strings, y un campo ausente debe reportarse por registro sin
/// abortar el lote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub vehicle_id: Option<Value>,
    pub timestamp: Option<Value>,
    pub latitude: Option<Value>,
    pub longitude: Option<Value>,
    pub speed_kph: Option<Value>,
    pub fuel_percentage: Option<Value>,
}

impl RawReading {
    /// Construir un registro crudo desde valores ya tipados
    pub fn new(
        vehicle_id: &str,
        timestamp: &str,
        latitude: f64,
        longitude: f64,
        speed_kph: f64,
        fuel_percentage: f64,
    ) -> Self {
        Self {
            vehicle_id: Some(Value::from(vehicle_id)),
            timestamp: Some(Value::from(timestamp)),
            latitude: Some(number(latitude)),
            longitude: Some(number(longitude)),
            speed_kph: Some(number(speed_kph)),
            fuel_percentage: Some(number(fuel_percentage)),
        }
    }

    /// Extraer un registro de un objeto JSON; cualquier otra forma es inválida
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("record must be a JSON object, got {}", json_kind(value)))?;
        let field = |name: &str| object.get(name).filter(|v| !v.is_null()).cloned();
        Ok(Self {
            vehicle_id: field("vehicle_id"),
            timestamp: field("timestamp"),
            latitude: field("latitude"),
            longitude: field("longitude"),
            speed_kph: field("speed_kph"),
            fuel_percentage: field("fuel_percentage"),
        })
    }

    /// Identificador del vehículo en texto, si se puede leer
    pub fn vehicle_id_hint(&self) -> Option<String> {
        self.vehicle_id.as_ref().and_then(value_as_text)
    }

    pub fn timestamp_hint(&self) -> Option<String> {
        self.timestamp.as_ref().and_then(value_as_text)
    }
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Texto de un valor escalar (string o número)
pub(crate) fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn reading(fuel: f64) -> NewReading {
        NewReading {
            vehicle_id: "V1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 9, 4, 12, 1, 0).unwrap(),
            latitude: 22.57,
            longitude: 88.36,
            speed_kph: 42.0,
            fuel_percentage: fuel,
            ingestion_format: IngestionFormat::SingleReading,
            batch_id: None,
            processing_metadata: json!({}),
        }
    }

    #[test]
    fn test_fuel_boundaries() {
        assert!(reading(100.0).check().is_ok());
        assert!(reading(0.0).check().is_ok());
        assert!(reading(100.0001).check().is_err());
        assert!(reading(-0.0001).check().is_err());
    }

    #[test]
    fn test_nan_and_negative_speed_are_rejected() {
        let mut r = reading(50.0);
        r.speed_kph = f64::NAN;
        assert!(r.check().is_err());

        let mut r = reading(50.0);
        r.speed_kph = -1.0;
        let errors = r.check().unwrap_err();
        assert!(errors.field_errors().contains_key("speed_kph"));
    }

    #[test]
    fn test_empty_vehicle_id_is_rejected() {
        let mut r = reading(50.0);
        r.vehicle_id = String::new();
        assert!(r.check().is_err());
    }

    #[test]
    fn test_format_names() {
        assert_eq!("simulation-engine".parse::<IngestionFormat>().unwrap(), IngestionFormat::SimulationEngine);
        assert_eq!("RAW_ARRAY".parse::<IngestionFormat>().unwrap(), IngestionFormat::RawArray);
        assert!("csv".parse::<IngestionFormat>().is_err());
        assert_eq!(serde_json::to_value(IngestionFormat::Legacy).unwrap(), json!("LEGACY"));
    }

    #[test]
    fn test_raw_reading_from_value() {
        let raw = RawReading::from_value(&json!({
            "vehicle_id": "V1",
            "timestamp": "2025-09-04T12:01:00Z",
            "latitude": "22.57",
            "speed_kph": null
        }))
        .unwrap();
        assert_eq!(raw.vehicle_id_hint().as_deref(), Some("V1"));
        assert_eq!(raw.latitude, Some(json!("22.57")));
        assert!(raw.speed_kph.is_none());
        assert!(raw.longitude.is_none());

        assert!(RawReading::from_value(&json!(42)).is_err());
    }
}
