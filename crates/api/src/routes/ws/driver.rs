//! Driver socket message handling.

use chrono::Utc;
use tracing::debug;

use super::reply;
use crate::app::AppState;
use crate::extractors::AuthenticatedParty;
use crate::services::registry::ChannelId;
use domain::events::{ClientMessage, ServerEvent};
use shared::validation::{validate_latitude, validate_longitude};

pub(super) async fn handle_message(
    state: AppState,
    party: AuthenticatedParty,
    channel: ChannelId,
    message: ClientMessage,
) {
    match message {
        ClientMessage::DriverLocationUpdate {
            latitude,
            longitude,
        } => {
            if validate_latitude(latitude).is_err() || validate_longitude(longitude).is_err() {
                reply(
                    &state,
                    channel,
                    ServerEvent::error("driver_location_update requires valid coordinates"),
                );
                return;
            }
            match state
                .driver_state
                .report_location(party.party_id, latitude, longitude)
                .await
            {
                Ok(report) => {
                    debug!(
                        driver_id = %party.party_id,
                        delivered = report.delivered,
                        notified = report.notified,
                        "Driver location ingested"
                    );
                }
                Err(e) => reply(&state, channel, ServerEvent::error(e.to_string())),
            }
        }
        ClientMessage::DriverStatusUpdate { status } => {
            if let Err(e) = state.driver_state.set_status(party.party_id, status).await {
                reply(&state, channel, ServerEvent::error(e.to_string()));
            }
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
            ServerEvent::error("Unsupported message for the driver socket"),
        ),
    }
}
