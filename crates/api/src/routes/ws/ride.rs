//! Ride tracking socket message handling.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::reply;
use crate::app::AppState;
use crate::extractors::AuthenticatedParty;
use crate::services::registry::{ride_group, ChannelId};
use domain::events::{ClientMessage, ServerEvent};
use domain::models::Role;
use persistence::repositories::{DriverProfileRepository, RideRequestRepository};

pub(super) async fn handle_message(
    state: AppState,
    party: AuthenticatedParty,
    channel: ChannelId,
    message: ClientMessage,
) {
    match message {
        ClientMessage::StartTracking { ride_id } => {
            if !is_participant(&state, &party, ride_id).await {
                reply(
                    &state,
                    channel,
                    ServerEvent::error("You are not authorized to track this ride"),
                );
                return;
            }
            state.registry.join_group(channel, &ride_group(ride_id));
            debug!(ride_id = %ride_id, party_id = %party.party_id, "Tracking started");
        }
        ClientMessage::StopTracking { ride_id } => {
            state.registry.leave_group(channel, &ride_group(ride_id));
        }
        ClientMessage::TrackingUpdate {
            ride_id,
            latitude,
            longitude,
        } => {
            if party.role != Role::Driver {
                reply(
                    &state,
                    channel,
                    ServerEvent::error("Only drivers can send tracking updates"),
                );
                return;
            }
            if !is_assigned_driver(&state, &party, ride_id).await {
                reply(
                    &state,
                    channel,
                    ServerEvent::error("This ride is not assigned to you"),
                );
                return;
            }

            // Keep the profile's last-known position fresh; tracking events
            // themselves stay inside the ride group.
            if let Err(e) = DriverProfileRepository::new(state.pool.clone())
                .update_location(party.party_id, latitude, longitude)
                .await
            {
                tracing::warn!(
                    driver_id = %party.party_id,
                    ride_id = %ride_id,
                    error = %e,
                    "Failed to update driver location from tracking update"
                );
            }

            state.registry.send_to_group(
                &ride_group(ride_id),
                &ServerEvent::DriverTrackLocation {
                    ride_id,
                    driver_id: party.party_id,
                    latitude,
                    longitude,
                    timestamp: Utc::now(),
                },
            );
        }
        ClientMessage::Ping => reply(
            &state,
            channel,
            ServerEvent::Pong {
                timestamp: Utc::now(),
            },
        ),
        _ => reply(
            &state,
            channel,
            ServerEvent::error("Unsupported message for the ride socket"),
        ),
    }
}

async fn is_participant(state: &AppState, party: &AuthenticatedParty, ride_id: Uuid) -> bool {
    match RideRequestRepository::new(state.pool.clone())
        .find_by_id(ride_id)
        .await
    {
        Ok(Some(ride)) => {
            ride.passenger_id == party.party_id || ride.driver_id == Some(party.party_id)
        }
        _ => false,
    }
}

async fn is_assigned_driver(state: &AppState, party: &AuthenticatedParty, ride_id: Uuid) -> bool {
    match RideRequestRepository::new(state.pool.clone())
        .find_by_id(ride_id)
        .await
    {
        Ok(Some(ride)) => ride.driver_id == Some(party.party_id),
        _ => false,
    }
}
