//! WebSocket endpoints: the bidirectional push surface.
//!
//! Three sockets share one pump: `/ws/driver` (location + status ingest,
//! ride offers), `/ws/passenger` (nearby subscriptions, ride lifecycle
//! events), and `/ws/ride` (shared tracking of an active ride). Each
//! connected socket registers a channel in the session registry; events
//! queued on the channel drain to the socket in FIFO order, and inbound
//! frames are dispatched to the endpoint's message handler.

mod driver;
mod passenger;
mod ride;

use std::future::Future;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthenticatedParty;
use crate::services::registry::ChannelId;
use domain::events::{ClientMessage, ServerEvent};
use domain::models::Role;

/// Driver socket: location/status ingest and ride offers.
pub async fn driver_ws(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    party.require(Role::Driver)?;
    Ok(ws.on_upgrade(move |socket| pump(state, party, socket, driver::handle_message)))
}

/// Passenger socket: nearby-driver subscription and ride events.
pub async fn passenger_ws(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    party.require(Role::Passenger)?;
    Ok(ws.on_upgrade(move |socket| pump(state, party, socket, passenger::handle_message)))
}

/// Ride tracking socket, shared by both participants.
pub async fn ride_ws(
    State(state): State<AppState>,
    party: AuthenticatedParty,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| pump(state, party, socket, ride::handle_message))
        .into_response()
}

/// Drive one socket: register the push channel, greet, then interleave
/// outbound drain with inbound dispatch until the peer goes away.
async fn pump<H, Fut>(state: AppState, party: AuthenticatedParty, socket: WebSocket, handle: H)
where
    H: Fn(AppState, AuthenticatedParty, ChannelId, ClientMessage) -> Fut,
    Fut: Future<Output = ()>,
{
    let (channel, mut outbox) = state.registry.register(party.party_id, party.role);
    let (mut sink, mut stream) = socket.split();

    info!(party_id = %party.party_id, role = %party.role, "Socket connected");
    state.registry.send_to_channel(
        channel,
        ServerEvent::ConnectionEstablished {
            party_id: party.party_id,
            role: party.role,
            message: format!("Connected as {}", party.role),
            timestamp: Utc::now(),
        },
    );

    loop {
        tokio::select! {
            outbound = outbox.recv() => {
                let Some(event) = outbound else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, kind = event.kind(), "Failed to encode event"),
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                handle(state.clone(), party, channel, message).await;
                            }
                            Err(e) => {
                                debug!(error = %e, "Unparseable client message");
                                state.registry.send_to_channel(
                                    channel,
                                    ServerEvent::error("Unsupported or malformed message"),
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Socket error");
                        break;
                    }
                }
            }
        }
    }

    disconnect(&state, party, channel);
}

/// Channel teardown: leave every group, then clear the party's ephemeral
/// presence. Ride state is durable and survives the disconnect; an
/// in-flight offer to a vanished driver still expires on its timer.
fn disconnect(state: &AppState, party: AuthenticatedParty, channel: ChannelId) {
    state.registry.unregister(channel);
    match party.role {
        Role::Driver => state.presence.remove_driver(party.party_id),
        Role::Passenger => state.presence.unsubscribe_passenger(party.party_id),
    }
    info!(party_id = %party.party_id, role = %party.role, "Socket disconnected");
}

/// Reply helper shared by the message handlers.
fn reply(state: &AppState, channel: ChannelId, event: ServerEvent) {
    state.registry.send_to_channel(channel, event);
}
