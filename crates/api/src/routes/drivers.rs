//! Driver endpoint handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthenticatedParty;
use domain::models::driver::{
    UpdateDriverLocationRequest, UpdateDriverStatusRequest, UpsertDriverProfileRequest,
};
use domain::models::{DriverProfile, DriverStatus, RideRequest, Role};
use persistence::repositories::RideRequestRepository;

const HISTORY_LIMIT: i64 = 50;

/// Pending rides considered per nearby poll.
const PENDING_SCAN_LIMIT: i64 = 200;

#[derive(Debug, Serialize)]
pub struct DriverStatusResponse {
    pub status: DriverStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DriverLocationResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub status: DriverStatus,
    /// Whether the update was fanned out to subscribed passengers (false
    /// when rate-limited or stationary).
    pub broadcasted: bool,
}

/// Fetch the caller's driver profile.
///
/// GET /api/v1/driver/profile
pub async fn get_profile(
    State(state): State<AppState>,
    party: AuthenticatedParty,
) -> Result<Json<DriverProfile>, ApiError> {
    party.require(Role::Driver)?;
    let profile = state.driver_state.profile(party.party_id).await?;
    Ok(Json(profile))
}

/// Create or update the caller's driver profile.
///
/// POST /api/v1/driver/profile
pub async fn upsert_profile(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Json(request): Json<UpsertDriverProfileRequest>,
) -> Result<Json<DriverProfile>, ApiError> {
    party.require(Role::Driver)?;
    request.validate()?;

    let profile = state
        .driver_state
        .upsert_profile(party.party_id, &request.vehicle_number)
        .await?;
    Ok(Json(profile))
}

/// Flip driver availability (available/offline).
///
/// PUT /api/v1/driver/status
pub async fn update_status(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Json(request): Json<UpdateDriverStatusRequest>,
) -> Result<Json<DriverStatusResponse>, ApiError> {
    party.require(Role::Driver)?;

    let status = state
        .driver_state
        .set_status(party.party_id, request.status)
        .await?;

    Ok(Json(DriverStatusResponse {
        status,
        message: format!("You are now {status}"),
    }))
}

/// Report the driver's current position.
///
/// POST /api/v1/driver/location
pub async fn update_location(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Json(request): Json<UpdateDriverLocationRequest>,
) -> Result<Json<DriverLocationResponse>, ApiError> {
    party.require(Role::Driver)?;
    request.validate()?;

    let report = state
        .driver_state
        .report_location(party.party_id, request.latitude, request.longitude)
        .await?;
    let profile = state.driver_state.profile(party.party_id).await?;

    Ok(Json(DriverLocationResponse {
        latitude: request.latitude,
        longitude: request.longitude,
        status: profile.status,
        broadcasted: report.delivered,
    }))
}

#[derive(Debug, Serialize)]
pub struct NearbyRideDto {
    #[serde(flatten)]
    pub ride: RideRequest,
    pub distance_m: f64,
}

#[derive(Debug, Serialize)]
pub struct NearbyRidesResponse {
    pub rides: Vec<NearbyRideDto>,
    pub count: usize,
}

/// Polling fallback for drivers without a live socket: pending rides,
/// closest pickup first.
///
/// POST /api/v1/driver/rides/nearby
pub async fn nearby_rides(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Json(request): Json<UpdateDriverLocationRequest>,
) -> Result<Json<NearbyRidesResponse>, ApiError> {
    party.require(Role::Driver)?;
    request.validate()?;

    // Not available means not dispatchable; an empty list beats an error
    // for a polling client.
    let profile = state.driver_state.profile(party.party_id).await?;
    if profile.status != DriverStatus::Available {
        return Ok(Json(NearbyRidesResponse {
            rides: Vec::new(),
            count: 0,
        }));
    }

    let mut rides: Vec<NearbyRideDto> = RideRequestRepository::new(state.pool.clone())
        .list_pending(PENDING_SCAN_LIMIT)
        .await?
        .into_iter()
        .map(|entity| entity.into_domain())
        .map(|ride| {
            let distance_m = shared::geo::distance_m(
                request.latitude,
                request.longitude,
                ride.pickup_latitude,
                ride.pickup_longitude,
            );
            NearbyRideDto { ride, distance_m }
        })
        .collect();
    rides.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let count = rides.len();
    Ok(Json(NearbyRidesResponse { rides, count }))
}

/// The ride currently assigned to the driver, or null.
///
/// GET /api/v1/driver/ride
pub async fn current_ride(
    State(state): State<AppState>,
    party: AuthenticatedParty,
) -> Result<Json<Option<RideRequest>>, ApiError> {
    party.require(Role::Driver)?;

    let ride = RideRequestRepository::new(state.pool.clone())
        .find_accepted_for_driver(party.party_id)
        .await?
        .map(|entity| entity.into_domain());

    Ok(Json(ride))
}

/// Completed rides of the driver, newest first.
///
/// GET /api/v1/driver/rides/history
pub async fn ride_history(
    State(state): State<AppState>,
    party: AuthenticatedParty,
) -> Result<Json<Vec<RideRequest>>, ApiError> {
    party.require(Role::Driver)?;

    let rides = RideRequestRepository::new(state.pool.clone())
        .list_completed_for_driver(party.party_id, HISTORY_LIMIT)
        .await?
        .into_iter()
        .map(|entity| entity.into_domain())
        .collect();

    Ok(Json(rides))
}
