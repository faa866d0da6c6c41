//! Ride lifecycle endpoint handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthenticatedParty;
use domain::models::ride::{
    CancelRideRequest, CancelRideResponse, CreateRideRequest, CreateRideResponse,
    CurrentRideResponse, RejectRideResponse,
};
use domain::models::{RideRequest, Role};
use persistence::repositories::RideRequestRepository;

const HISTORY_LIMIT: i64 = 50;

/// Create a ride request and start the offer chain.
///
/// POST /api/v1/rides
pub async fn create_ride(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Json(request): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<CreateRideResponse>), ApiError> {
    party.require(Role::Passenger)?;
    request.validate()?;

    let (ride, driver_candidates) = state
        .lifecycle
        .create_request(party.party_id, &request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRideResponse {
            ride,
            driver_candidates,
        }),
    ))
}

/// The passenger's current ride, if one is live (or freshly settled as
/// no_drivers).
///
/// GET /api/v1/rides/current
pub async fn current_ride(
    State(state): State<AppState>,
    party: AuthenticatedParty,
) -> Result<Json<CurrentRideResponse>, ApiError> {
    party.require(Role::Passenger)?;

    let ride = RideRequestRepository::new(state.pool.clone())
        .find_current_for_passenger(party.party_id)
        .await?
        .map(|entity| entity.into_domain());

    Ok(Json(CurrentRideResponse {
        has_active_ride: ride
            .as_ref()
            .is_some_and(|ride| ride.status.is_active()),
        status: ride.as_ref().map(|ride| ride.status),
        ride,
    }))
}

/// Cancel a ride. Passengers may cancel any non-terminal ride of theirs;
/// drivers may cancel a ride currently assigned to them.
///
/// POST /api/v1/rides/:ride_id/cancel
pub async fn cancel_ride(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Path(ride_id): Path<Uuid>,
    Json(request): Json<CancelRideRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;

    match party.role {
        Role::Passenger => {
            let (ride, was_assigned) = state
                .lifecycle
                .cancel_by_passenger(party.party_id, ride_id, request.reason)
                .await?;
            Ok(Json(CancelRideResponse { ride, was_assigned }).into_response())
        }
        Role::Driver => {
            let ride = state
                .lifecycle
                .cancel_by_driver(party.party_id, ride_id, request.reason)
                .await?;
            Ok(Json(ride).into_response())
        }
    }
}

/// Accept a pending ride offer.
///
/// POST /api/v1/rides/:ride_id/accept
pub async fn accept_ride(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideRequest>, ApiError> {
    party.require(Role::Driver)?;
    let ride = state.lifecycle.accept(party.party_id, ride_id).await?;
    Ok(Json(ride))
}

/// Reject a pending ride offer; the chain advances to the next driver.
///
/// POST /api/v1/rides/:ride_id/reject
pub async fn reject_ride(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RejectRideResponse>, ApiError> {
    party.require(Role::Driver)?;
    let queued_next_driver = state.lifecycle.reject(party.party_id, ride_id).await?;
    Ok(Json(RejectRideResponse { queued_next_driver }))
}

/// Complete the ride currently assigned to the driver.
///
/// POST /api/v1/rides/:ride_id/complete
pub async fn complete_ride(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideRequest>, ApiError> {
    party.require(Role::Driver)?;
    let ride = state.lifecycle.complete(party.party_id, ride_id).await?;
    Ok(Json(ride))
}

/// The passenger's ride history, newest first.
///
/// GET /api/v1/rides/history
pub async fn ride_history(
    State(state): State<AppState>,
    party: AuthenticatedParty,
) -> Result<Json<Vec<RideRequest>>, ApiError> {
    party.require(Role::Passenger)?;

    let rides = RideRequestRepository::new(state.pool.clone())
        .list_for_passenger(party.party_id, HISTORY_LIMIT)
        .await?
        .into_iter()
        .map(|entity| entity.into_domain())
        .collect();

    Ok(Json(rides))
}
