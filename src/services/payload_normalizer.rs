//! Normalización de payloads de ingesta
//!
//! Los productores envían cuatro formas distintas. Cada una tiene su
//! variante en `PayloadBody` y su propia extracción; todas convergen en
//! `RawReading` y de ahí en `NewReading`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};

use crate::models::telemetry::{json_kind, value_as_text, IngestionFormat, NewReading, RawReading};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::validation::validate_datetime;

/// Forma concreta del payload recibido
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    /// `{timestamp, batch_size, telemetry_data: [...]}`
    SimulationEngine {
        declared_batch_size: Option<u64>,
        telemetry_data: Vec<Value>,
    },
    /// `{readings: [...]}`
    Legacy { readings: Vec<Value> },
    /// `[...]`
    RawArray { records: Vec<Value> },
    /// `{vehicle_id, timestamp, ...}`
    SingleReading { record: Value },
}

/// Payload detectado con los metadatos que se guardan en el ledger
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPayload {
    pub body: PayloadBody,
    /// `timestamp` de nivel superior de un payload objeto
    pub batch_timestamp: Option<DateTime<Utc>>,
    pub payload_keys: Vec<String>,
    pub payload_size: usize,
}

/// Lote listo para el coordinador
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub format: IngestionFormat,
    pub batch_timestamp: Option<DateTime<Utc>>,
    /// Un elemento por registro; `Err` lleva el motivo del rechazo
    pub records: Vec<Result<RawReading, String>>,
    pub payload_metadata: Value,
}

impl TelemetryPayload {
    /// Detectar el formato en el orden: simulation engine, legacy, array, lectura única
    pub fn detect(value: Value) -> AppResult<Self> {
        let payload_size = value.to_string().len();

        match value {
            Value::Array(records) => Ok(Self {
                body: PayloadBody::RawArray { records },
                batch_timestamp: None,
                payload_keys: vec!["array".to_string()],
                payload_size,
            }),
            Value::Object(mut object) => {
                let payload_keys: Vec<String> = object.keys().cloned().collect();
                let batch_timestamp = batch_timestamp(&object);

                let body = if object.contains_key("telemetry_data") && object.contains_key("batch_size") {
                    let telemetry_data = take_array(&mut object, "telemetry_data")?;
                    PayloadBody::SimulationEngine {
                        declared_batch_size: object.get("batch_size").and_then(Value::as_u64),
                        telemetry_data,
                    }
                } else if object.contains_key("readings") {
                    PayloadBody::Legacy {
                        readings: take_array(&mut object, "readings")?,
                    }
                } else if object.contains_key("vehicle_id") && object.contains_key("timestamp") {
                    PayloadBody::SingleReading {
                        record: Value::Object(object),
                    }
                } else {
                    return Err(AppError::UnknownFormat(format!(
                        "keys: {}",
                        payload_keys.join(", ")
                    )));
                };

                Ok(Self {
                    body,
                    batch_timestamp,
                    payload_keys,
                    payload_size,
                })
            }
            other => Err(AppError::UnknownFormat(format!(
                "expected object or array, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn format(&self) -> IngestionFormat {
        match self.body {
            PayloadBody::SimulationEngine { .. } => IngestionFormat::SimulationEngine,
            PayloadBody::Legacy { .. } => IngestionFormat::Legacy,
            PayloadBody::RawArray { .. } => IngestionFormat::RawArray,
            PayloadBody::SingleReading { .. } => IngestionFormat::SingleReading,
        }
    }

    pub fn normalize(self) -> NormalizedBatch {
        let format = self.format();
        let mut metadata = json!({
            "payload_keys": self.payload_keys,
            "payload_size": self.payload_size,
        });

        let values = match self.body {
            PayloadBody::SimulationEngine {
                declared_batch_size,
                telemetry_data,
            } => {
                if let Some(declared) = declared_batch_size {
                    metadata["declared_batch_size"] = json!(declared);
                    if declared != telemetry_data.len() as u64 {
                        tracing::warn!(
                            "⚠️ batch_size declarado ({}) distinto de los registros recibidos ({})",
                            declared,
                            telemetry_data.len()
                        );
                    }
                }
                telemetry_data
            }
            PayloadBody::Legacy { readings } => readings,
            PayloadBody::RawArray { records } => records,
            PayloadBody::SingleReading { record } => vec![record],
        };

        NormalizedBatch {
            format,
            batch_timestamp: self.batch_timestamp,
            records: values.iter().map(RawReading::from_value).collect(),
            payload_metadata: metadata,
        }
    }
}

impl NormalizedBatch {
    /// Lote a partir de registros ya extraídos por el llamador
    pub fn from_records(records: Vec<RawReading>, format: IngestionFormat) -> Self {
        let payload_metadata = json!({
            "payload_keys": ["records"],
            "payload_size": records.len(),
        });
        Self {
            format,
            batch_timestamp: None,
            records: records.into_iter().map(Ok).collect(),
            payload_metadata,
        }
    }
}

fn take_array(object: &mut Map<String, Value>, key: &str) -> AppResult<Vec<Value>> {
    match object.remove(key) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(AppError::UnknownFormat(format!(
            "'{}' must be an array, got {}",
            key,
            json_kind(&other)
        ))),
        None => Ok(Vec::new()),
    }
}

fn batch_timestamp(object: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let raw = object.get("timestamp")?.as_str()?;
    match parse_timestamp(raw) {
        Ok(ts) => Some(ts),
        Err(reason) => {
            tracing::warn!("⚠️ Timestamp de lote ignorado: {}", reason);
            None
        }
    }
}

/// RFC 3339 (con `Z` u offset); sin offset se interpreta como UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = validate_datetime(raw) {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("invalid timestamp '{}'", raw))
}

fn number_field(value: Option<&Value>, name: &str) -> Result<f64, String> {
    match value {
        None => Err(format!("missing field '{}'", name)),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| format!("field '{}' is not representable as a number", name)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("field '{}' is not numeric: '{}'", name, s)),
        Some(other) => Err(format!("field '{}' must be a number, got {}", name, json_kind(other))),
    }
}

/// Convertir un registro crudo en la lectura canónica.
///
/// Solo comprueba presencia y tipos; los rangos los valida `NewReading::check`.
pub fn to_new_reading(
    raw: &RawReading,
    format: IngestionFormat,
    batch_id: Option<u64>,
    processing_metadata: Value,
) -> Result<NewReading, String> {
    let vehicle_id = match raw.vehicle_id.as_ref() {
        None => return Err("missing field 'vehicle_id'".to_string()),
        Some(value) => value_as_text(value)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| format!("field 'vehicle_id' must be a string, got {}", json_kind(value)))?,
    };
    let timestamp = match raw.timestamp.as_ref() {
        None => return Err("missing field 'timestamp'".to_string()),
        Some(Value::String(s)) => parse_timestamp(s)?,
        Some(other) => {
            return Err(format!("field 'timestamp' must be a string, got {}", json_kind(other)))
        }
    };

    Ok(NewReading {
        vehicle_id,
        timestamp,
        latitude: number_field(raw.latitude.as_ref(), "latitude")?,
        longitude: number_field(raw.longitude.as_ref(), "longitude")?,
        speed_kph: number_field(raw.speed_kph.as_ref(), "speed_kph")?,
        fuel_percentage: number_field(raw.fuel_percentage.as_ref(), "fuel_percentage")?,
        ingestion_format: format,
        batch_id,
        processing_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(vehicle_id: &str, minute: u32) -> Value {
        json!({
            "vehicle_id": vehicle_id,
            "timestamp": format!("2025-09-04T12:{:02}:00Z", minute),
            "latitude": 22.57,
            "longitude": 88.36,
            "speed_kph": 40.0,
            "fuel_percentage": 75.5
        })
    }

    #[test]
    fn test_detects_all_four_formats() {
        let simulation = json!({
            "timestamp": "2025-09-04T12:05:00.123456Z",
            "batch_size": 1,
            "telemetry_data": [record("V1", 0)]
        });
        let payload = TelemetryPayload::detect(simulation).unwrap();
        assert_eq!(payload.format(), IngestionFormat::SimulationEngine);
        let batch = payload.normalize();
        assert!(batch.batch_timestamp.is_some());
        assert_eq!(batch.records.len(), 1);

        let legacy = json!({ "readings": [record("V1", 0), record("V1", 1)] });
        assert_eq!(TelemetryPayload::detect(legacy).unwrap().format(), IngestionFormat::Legacy);

        let array = json!([record("V1", 0)]);
        assert_eq!(TelemetryPayload::detect(array).unwrap().format(), IngestionFormat::RawArray);

        let single = record("V1", 0);
        assert_eq!(TelemetryPayload::detect(single).unwrap().format(), IngestionFormat::SingleReading);
    }

    #[test]
    fn test_batch_timestamp_from_any_object_payload() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 4, 9, 15, 0).unwrap();
        let legacy = json!({ "timestamp": "2025-09-04T09:15:00Z", "readings": [record("V1", 0)] });
        let batch = TelemetryPayload::detect(legacy).unwrap().normalize();
        assert_eq!(batch.format, IngestionFormat::Legacy);
        assert_eq!(batch.batch_timestamp, Some(expected));

        let single = TelemetryPayload::detect(record("V1", 7)).unwrap().normalize();
        assert_eq!(
            single.batch_timestamp,
            Some(Utc.with_ymd_and_hms(2025, 9, 4, 12, 7, 0).unwrap())
        );

        let array = TelemetryPayload::detect(json!([record("V1", 0)])).unwrap().normalize();
        assert_eq!(array.batch_timestamp, None);

        let unparseable = json!({ "timestamp": "ayer", "readings": [record("V1", 0)] });
        let batch = TelemetryPayload::detect(unparseable).unwrap().normalize();
        assert_eq!(batch.batch_timestamp, None);
    }

    #[test]
    fn test_telemetry_data_without_batch_size_is_not_simulation() {
        let payload = json!({ "telemetry_data": [record("V1", 0)] });
        assert!(TelemetryPayload::detect(payload).is_err());

        assert!(TelemetryPayload::detect(json!({ "foo": 1 })).is_err());
        assert!(TelemetryPayload::detect(json!("hello")).is_err());
    }

    #[test]
    fn test_declared_batch_size_mismatch_is_recorded() {
        let payload = json!({ "batch_size": 5, "telemetry_data": [record("V1", 0)] });
        let batch = TelemetryPayload::detect(payload).unwrap().normalize();
        assert_eq!(batch.payload_metadata["declared_batch_size"], json!(5));
        assert_eq!(batch.records.len(), 1);
        assert!(batch.payload_metadata["payload_keys"].as_array().unwrap().len() == 2);
    }

    #[test]
    fn test_numeric_strings_and_missing_fields() {
        let raw = RawReading::from_value(&json!({
            "vehicle_id": "V1",
            "timestamp": "2025-09-04T12:00:00",
            "latitude": "22.57",
            "longitude": 88.36,
            "speed_kph": "0",
            "fuel_percentage": 80
        }))
        .unwrap();
        let reading = to_new_reading(&raw, IngestionFormat::Legacy, Some(1), json!({})).unwrap();
        assert_eq!(reading.latitude, 22.57);
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2025, 9, 4, 12, 0, 0).unwrap());

        let mut missing = raw.clone();
        missing.fuel_percentage = None;
        let err = to_new_reading(&missing, IngestionFormat::Legacy, None, json!({})).unwrap_err();
        assert!(err.contains("fuel_percentage"));

        let mut garbage = raw;
        garbage.speed_kph = Some(json!("fast"));
        assert!(to_new_reading(&garbage, IngestionFormat::Legacy, None, json!({})).is_err());
    }

    #[test]
    fn test_non_object_record_is_a_record_error() {
        let batch = TelemetryPayload::detect(json!([record("V1", 0), 42])).unwrap().normalize();
        assert!(batch.records[0].is_ok());
        assert!(batch.records[1].is_err());
    }
}
