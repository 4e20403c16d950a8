use validator::Validate;

use crate::dto::vehicle_dto::VehicleFilters;
use crate::dto::ApiResponse;
use crate::models::vehicle::{UpdateVehicleRequest, UpsertVehicleRequest, Vehicle};
use crate::repositories::VehicleRegistry;
use crate::state::AppState;
use crate::utils::errors::{not_found_error, AppError};
use std::sync::Arc;

pub struct VehicleController {
    registry: Arc<dyn VehicleRegistry>,
}

impl VehicleController {
    pub fn new(state: &AppState) -> Self {
        Self {
            registry: state.registry.clone(),
        }
    }

    pub async fn upsert(&self, request: UpsertVehicleRequest) -> Result<ApiResponse<Vehicle>, AppError> {
        request.validate()?;
        let existing = self.registry.get(&request.vehicle_id).await?;
        let message = if existing.is_some() {
            "Vehículo actualizado exitosamente"
        } else {
            "Vehículo registrado exitosamente"
        };

        let vehicle = self.registry.upsert(request.into_vehicle(existing.as_ref())).await?;
        tracing::info!("🚚 Vehículo {} guardado en el registro", vehicle.vehicle_id);
        Ok(ApiResponse::success_with_message(vehicle, message.to_string()))
    }

    pub async fn get(&self, vehicle_id: &str) -> Result<Vehicle, AppError> {
        self.registry
            .get(vehicle_id)
            .await?
            .ok_or_else(|| not_found_error("Vehicle", vehicle_id))
    }

    pub async fn list(&self, filters: VehicleFilters) -> Result<Vec<Vehicle>, AppError> {
        self.registry.list(filters.active_only.unwrap_or(false)).await
    }

    pub async fn update(
        &self,
        vehicle_id: &str,
        request: UpdateVehicleRequest,
    ) -> Result<ApiResponse<Vehicle>, AppError> {
        request.validate()?;
        let current = self.get(vehicle_id).await?;
        let vehicle = self.registry.upsert(request.apply(current)).await?;
        Ok(ApiResponse::success_with_message(
            vehicle,
            "Vehículo actualizado exitosamente".to_string(),
        ))
    }

    /// Baja lógica: el vehículo queda inactivo, sus datos se conservan
    pub async fn deactivate(&self, vehicle_id: &str) -> Result<ApiResponse<Vehicle>, AppError> {
        let vehicle = self.registry.deactivate(vehicle_id).await?;
        tracing::info!("🚫 Vehículo {} desactivado", vehicle_id);
        Ok(ApiResponse::success_with_message(
            vehicle,
            "Vehículo desactivado exitosamente".to_string(),
        ))
    }
}
