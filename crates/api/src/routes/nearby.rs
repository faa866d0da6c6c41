//! Nearby-driver query endpoint.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthenticatedParty;
use domain::models::{DriverStatus, Role};
use shared::validation::{validate_latitude, validate_longitude, validate_radius_m};

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct NearbyDriverDto {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_number: Option<String>,
    pub distance_m: f64,
}

#[derive(Debug, Serialize)]
pub struct NearbyResponse {
    pub drivers: Vec<NearbyDriverDto>,
    pub count: usize,
}

/// Available drivers around a point, closest first.
///
/// GET /api/v1/drivers/nearby
pub async fn nearby_drivers(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<NearbyResponse>, ApiError> {
    party.require(Role::Passenger)?;

    let radius_m = query
        .radius_m
        .unwrap_or(f64::from(state.config.dispatch.default_broadcast_radius_m));
    validate_latitude(query.latitude)
        .and(validate_longitude(query.longitude))
        .and(validate_radius_m(radius_m))
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let drivers: Vec<NearbyDriverDto> = state
        .presence
        .query_nearby(
            query.latitude,
            query.longitude,
            radius_m,
            None,
            Some(DriverStatus::Available),
        )
        .into_iter()
        .map(|driver| NearbyDriverDto {
            driver_id: driver.driver_id,
            latitude: driver.latitude,
            longitude: driver.longitude,
            username: driver.username,
            vehicle_number: driver.vehicle_number,
            distance_m: driver.distance_m,
        })
        .collect();

    let count = drivers.len();
    Ok(Json(NearbyResponse { drivers, count }))
}
