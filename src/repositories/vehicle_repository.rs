//! Registro maestro de vehículos
//!
//! Almacén clave-valor por `vehicle_id`. Hay dos implementaciones: en
//! memoria (por defecto) y PostgreSQL (cuando existe `DATABASE_URL`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::PgPool;

use crate::models::vehicle::Vehicle;
use crate::utils::errors::{not_found_error, AppResult};

#[async_trait]
pub trait VehicleRegistry: Send + Sync {
    async fn get(&self, vehicle_id: &str) -> AppResult<Option<Vehicle>>;

    /// Insertar o reemplazar; conserva `created_at` del registro existente
    async fn upsert(&self, vehicle: Vehicle) -> AppResult<Vehicle>;

    async fn list(&self, active_only: bool) -> AppResult<Vec<Vehicle>>;

    /// Baja lógica (`active = false`)
    async fn deactivate(&self, vehicle_id: &str) -> AppResult<Vehicle>;

    /// Registrar con valores por defecto si no existe.
    ///
    /// Devuelve el vehículo y `true` si se acaba de crear. Dos llamadas
    /// concurrentes para el mismo id crean un solo registro.
    async fn register_if_absent(&self, vehicle_id: &str) -> AppResult<(Vehicle, bool)>;
}

/// Registro en memoria
#[derive(Default)]
pub struct InMemoryVehicleRegistry {
    vehicles: DashMap<String, Vehicle>,
}

impl InMemoryVehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VehicleRegistry for InMemoryVehicleRegistry {
    async fn get(&self, vehicle_id: &str) -> AppResult<Option<Vehicle>> {
        Ok(self.vehicles.get(vehicle_id).map(|v| v.clone()))
    }

    async fn upsert(&self, mut vehicle: Vehicle) -> AppResult<Vehicle> {
        match self.vehicles.entry(vehicle.vehicle_id.clone()) {
            Entry::Occupied(mut entry) => {
                vehicle.created_at = entry.get().created_at;
                entry.insert(vehicle.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(vehicle.clone());
            }
        }
        Ok(vehicle)
    }

    async fn list(&self, active_only: bool) -> AppResult<Vec<Vehicle>> {
        let mut vehicles: Vec<Vehicle> = self
            .vehicles
            .iter()
            .filter(|v| !active_only || v.active)
            .map(|v| v.clone())
            .collect();
        vehicles.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        Ok(vehicles)
    }

    async fn deactivate(&self, vehicle_id: &str) -> AppResult<Vehicle> {
        let mut vehicle = self
            .vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| not_found_error("Vehicle", vehicle_id))?;
        vehicle.active = false;
        vehicle.updated_at = Utc::now();
        Ok(vehicle.clone())
    }

    async fn register_if_absent(&self, vehicle_id: &str) -> AppResult<(Vehicle, bool)> {
        match self.vehicles.entry(vehicle_id.to_string()) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                let vehicle = Vehicle::with_defaults(vehicle_id);
                entry.insert(vehicle.clone());
                Ok((vehicle, true))
            }
        }
    }
}

/// Fila de la tabla `vehicles`
#[derive(Debug, sqlx::FromRow)]
struct VehicleRow {
    vehicle_id: String,
    tank_capacity_liters: f64,
    mileage_kmpl: f64,
    vehicle_type: String,
    active: bool,
    vehicle_metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<VehicleRow> for Vehicle {
    fn from(row: VehicleRow) -> Self {
        Vehicle {
            vehicle_id: row.vehicle_id,
            tank_capacity_liters: row.tank_capacity_liters,
            mileage_kmpl: row.mileage_kmpl,
            vehicle_type: row.vehicle_type,
            active: row.active,
            vehicle_metadata: row.vehicle_metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Registro en PostgreSQL
pub struct PgVehicleRegistry {
    pool: PgPool,
}

impl PgVehicleRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VehicleRegistry for PgVehicleRegistry {
    async fn get(&self, vehicle_id: &str) -> AppResult<Option<Vehicle>> {
        let row = sqlx::query_as::<_, VehicleRow>("SELECT * FROM vehicles WHERE vehicle_id = $1")
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Vehicle::from))
    }

    async fn upsert(&self, vehicle: Vehicle) -> AppResult<Vehicle> {
        let row = sqlx::query_as::<_, VehicleRow>(
            r#"
            INSERT INTO vehicles (vehicle_id, tank_capacity_liters, mileage_kmpl, vehicle_type, active, vehicle_metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (vehicle_id) DO UPDATE
            SET tank_capacity_liters = EXCLUDED.tank_capacity_liters,
                mileage_kmpl = EXCLUDED.mileage_kmpl,
                vehicle_type = EXCLUDED.vehicle_type,
                active = EXCLUDED.active,
                vehicle_metadata = EXCLUDED.vehicle_metadata,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(&vehicle.vehicle_id)
        .bind(vehicle.tank_capacity_liters)
        .bind(vehicle.mileage_kmpl)
        .bind(&vehicle.vehicle_type)
        .bind(vehicle.active)
        .bind(&vehicle.vehicle_metadata)
        .bind(vehicle.created_at)
        .bind(vehicle.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list(&self, active_only: bool) -> AppResult<Vec<Vehicle>> {
        let rows = sqlx::query_as::<_, VehicleRow>(
            "SELECT * FROM vehicles WHERE active OR NOT $1 ORDER BY vehicle_id",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Vehicle::from).collect())
    }

    async fn deactivate(&self, vehicle_id: &str) -> AppResult<Vehicle> {
        let row = sqlx::query_as::<_, VehicleRow>(
            "UPDATE vehicles SET active = FALSE, updated_at = NOW() WHERE vehicle_id = $1 RETURNING *",
        )
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found_error("Vehicle", vehicle_id))?;

        Ok(row.into())
    }

    async fn register_if_absent(&self, vehicle_id: &str) -> AppResult<(Vehicle, bool)> {
        let defaults = Vehicle::with_defaults(vehicle_id);
        let inserted = sqlx::query_as::<_, VehicleRow>(
            r#"
            INSERT INTO vehicles (vehicle_id, tank_capacity_liters, mileage_kmpl, vehicle_type, active, vehicle_metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $6)
            ON CONFLICT (vehicle_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&defaults.vehicle_id)
        .bind(defaults.tank_capacity_liters)
        .bind(defaults.mileage_kmpl)
        .bind(&defaults.vehicle_type)
        .bind(&defaults.vehicle_metadata)
        .bind(defaults.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let existing = self
            .get(vehicle_id)
            .await?
            .ok_or_else(|| not_found_error("Vehicle", vehicle_id))?;
        Ok((existing, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_if_absent_creates_once() {
        let registry = InMemoryVehicleRegistry::new();
        let (first, created) = registry.register_if_absent("TRUCK-7").await.unwrap();
        assert!(created);
        assert_eq!(first.vehicle_type, "TRUCK");

        let (second, created) = registry.register_if_absent("TRUCK-7").await.unwrap();
        assert!(!created);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_upsert_preserves_created_at() {
        let registry = InMemoryVehicleRegistry::new();
        let (original, _) = registry.register_if_absent("V1").await.unwrap();

        let mut changed = Vehicle::with_defaults("V1");
        changed.tank_capacity_liters = 320.0;
        let stored = registry.upsert(changed).await.unwrap();

        assert_eq!(stored.created_at, original.created_at);
        assert_eq!(registry.get("V1").await.unwrap().unwrap().tank_capacity_liters, 320.0);
    }

    #[tokio::test]
    async fn test_deactivate_is_soft() {
        let registry = InMemoryVehicleRegistry::new();
        registry.register_if_absent("V1").await.unwrap();
        registry.register_if_absent("V2").await.unwrap();

        let vehicle = registry.deactivate("V1").await.unwrap();
        assert!(!vehicle.active);
        assert!(registry.get("V1").await.unwrap().is_some());
        assert_eq!(registry.list(true).await.unwrap().len(), 1);
        assert_eq!(registry.list(false).await.unwrap().len(), 2);

        assert!(registry.deactivate("missing").await.is_err());
    }
}
