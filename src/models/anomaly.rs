//! Modelos de Anomaly Events
//!
//! Eventos derivados que produce el detector externo. Solo se agregan;
//! el único cambio permitido es `processed` de false a true.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Tipo de anomalía - mapea al ENUM anomaly_type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    FuelTheft,
    RouteDeviation,
    UnusualStop,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::FuelTheft => "FUEL_THEFT",
            AnomalyType::RouteDeviation => "ROUTE_DEVIATION",
            AnomalyType::UnusualStop => "UNUSUAL_STOP",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FUEL_THEFT" => Ok(AnomalyType::FuelTheft),
            "ROUTE_DEVIATION" => Ok(AnomalyType::RouteDeviation),
            "UNUSUAL_STOP" => Ok(AnomalyType::UnusualStop),
            _ => Err(format!("unknown anomaly type '{}'", s)),
        }
    }
}

fn default_severity() -> u8 {
    1
}

fn empty_details() -> Value {
    Value::Object(Default::default())
}

/// Evento enviado por el detector
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewAnomalyEvent {
    #[validate(length(min = 1, max = 50))]
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AnomalyType,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_score: f64,
    #[serde(default = "default_severity")]
    #[validate(range(min = 1, max = 5))]
    pub severity: u8,
    #[serde(default = "empty_details")]
    pub details: Value,
}

/// Evento almacenado
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AnomalyType,
    pub confidence_score: f64,
    pub severity: u8,
    pub details: Value,
    pub processed: bool,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyEvent {
    pub fn from_new(new: NewAnomalyEvent, detected_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vehicle_id: new.vehicle_id,
            timestamp: new.timestamp,
            event_type: new.event_type,
            confidence_score: new.confidence_score,
            severity: new.severity,
            details: new.details,
            processed: false,
            detected_at,
        }
    }
}
