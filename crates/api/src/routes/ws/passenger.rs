//! Passenger socket message handling.

use chrono::Utc;
use tracing::info;

use super::reply;
use crate::app::AppState;
use crate::extractors::AuthenticatedParty;
use crate::services::presence::SubscribeOutcome;
use crate::services::registry::ChannelId;
use domain::events::{ClientMessage, ServerEvent};
use shared::validation::{validate_latitude, validate_longitude, validate_radius_m};

pub(super) async fn handle_message(
    state: AppState,
    party: AuthenticatedParty,
    channel: ChannelId,
    message: ClientMessage,
) {
    match message {
        ClientMessage::SubscribeNearby {
            latitude,
            longitude,
            radius_m,
        } => {
            let radius =
                radius_m.unwrap_or(f64::from(state.config.dispatch.default_broadcast_radius_m));
            if let Err(event) = check_viewport(latitude, longitude, radius) {
                reply(&state, channel, event);
                return;
            }

            let outcome = state.presence.subscribe_passenger(
                party.party_id,
                channel,
                latitude,
                longitude,
                radius,
            );
            info!(
                passenger_id = %party.party_id,
                tiles = outcome.tiles.len(),
                nearby = outcome.nearby.len(),
                "Passenger subscribed to nearby updates"
            );
            send_snapshot(&state, channel, radius, outcome);
        }
        ClientMessage::UnsubscribeNearby => {
            state.presence.unsubscribe_passenger(party.party_id);
        }
        ClientMessage::UpdateLocation {
            latitude,
            longitude,
            radius_m,
        } => {
            let Some(current_radius) = state.presence.subscription_radius(party.party_id) else {
                reply(
                    &state,
                    channel,
                    ServerEvent::error("Not subscribed. Send subscribe_nearby first."),
                );
                return;
            };
            let radius = radius_m.unwrap_or(current_radius);
            if let Err(event) = check_viewport(latitude, longitude, radius) {
                reply(&state, channel, event);
                return;
            }

            let outcome = state.presence.subscribe_passenger(
                party.party_id,
                channel,
                latitude,
                longitude,
                radius,
            );
            send_snapshot(&state, channel, radius, outcome);
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
            ServerEvent::error("Unsupported message for the passenger socket"),
        ),
    }
}

fn check_viewport(latitude: f64, longitude: f64, radius_m: f64) -> Result<(), ServerEvent> {
    validate_latitude(latitude)
        .and(validate_longitude(longitude))
        .and(validate_radius_m(radius_m))
        .map_err(|e| ServerEvent::error(e.to_string()))
}

/// Acknowledge the subscription, then stream the initial snapshot one
/// driver per event so the client renders them exactly like live updates.
fn send_snapshot(state: &AppState, channel: ChannelId, radius_m: f64, outcome: SubscribeOutcome) {
    reply(
        state,
        channel,
        ServerEvent::SubscribedNearby {
            radius_m,
            tiles: outcome.tiles,
            nearby_drivers: outcome.nearby.len(),
            timestamp: Utc::now(),
        },
    );

    for driver in outcome.nearby {
        reply(
            state,
            channel,
            ServerEvent::DriverLocationUpdated {
                driver_id: driver.driver_id,
                latitude: driver.latitude,
                longitude: driver.longitude,
                username: driver.username,
                vehicle_number: driver.vehicle_number,
                tile: None,
                distance_m: Some(driver.distance_m),
                timestamp: Utc::now(),
            },
        );
    }
}
