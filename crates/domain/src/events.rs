//! Push message taxonomy for the bidirectional client connections.
//!
//! Every payload carries a `type` discriminator on the wire. Inbound
//! messages arrive from connected clients; outbound events are produced by
//! the dispatch core and fanned out through the session registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DriverStatus, RideRequest, Role};

/// Messages a connected client may send.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Passenger subscribes to driver updates around a point.
    SubscribeNearby {
        latitude: f64,
        longitude: f64,
        radius_m: Option<f64>,
    },
    /// Passenger drops the nearby subscription.
    UnsubscribeNearby,
    /// Passenger moved; refresh the subscription tiles and snapshot.
    UpdateLocation {
        latitude: f64,
        longitude: f64,
        radius_m: Option<f64>,
    },
    /// Driver reports a position fix.
    DriverLocationUpdate { latitude: f64, longitude: f64 },
    /// Driver flips availability (available/offline; busy is lifecycle-owned).
    DriverStatusUpdate { status: DriverStatus },
    /// Join the shared tracking group of an active ride.
    StartTracking { ride_id: Uuid },
    /// Leave a ride's tracking group.
    StopTracking { ride_id: Uuid },
    /// Driver streams position to a ride's tracking group.
    TrackingUpdate {
        ride_id: Uuid,
        latitude: f64,
        longitude: f64,
    },
    /// Keep-alive.
    Ping,
}

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionEstablished {
        party_id: Uuid,
        role: Role,
        message: String,
        timestamp: DateTime<Utc>,
    },
    SubscribedNearby {
        radius_m: f64,
        tiles: Vec<String>,
        nearby_drivers: usize,
        timestamp: DateTime<Utc>,
    },
    DriverLocationUpdated {
        driver_id: Uuid,
        latitude: f64,
        longitude: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        vehicle_number: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tile: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        distance_m: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    DriverStatusChanged {
        driver_id: Uuid,
        status: DriverStatus,
        latitude: f64,
        longitude: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        vehicle_number: Option<String>,
        timestamp: DateTime<Utc>,
    },
    RideOffer {
        offer_id: Uuid,
        ride: RideRequest,
        expires_in_s: u64,
        timestamp: DateTime<Utc>,
    },
    RideAccepted {
        ride_id: Uuid,
        driver_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        ride: Option<RideRequest>,
        message: String,
        timestamp: DateTime<Utc>,
    },
    RideExpired {
        ride_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
    RideCancelled {
        ride_id: Uuid,
        cancelled_by: Role,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    RideCompleted {
        ride_id: Uuid,
        ride: RideRequest,
        timestamp: DateTime<Utc>,
    },
    NoDriversAvailable {
        ride_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
    DriverTrackLocation {
        ride_id: Uuid,
        driver_id: Uuid,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// Convenience constructor for error events.
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// The wire value of the `type` discriminator, for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionEstablished { .. } => "connection_established",
            ServerEvent::SubscribedNearby { .. } => "subscribed_nearby",
            ServerEvent::DriverLocationUpdated { .. } => "driver_location_updated",
            ServerEvent::DriverStatusChanged { .. } => "driver_status_changed",
            ServerEvent::RideOffer { .. } => "ride_offer",
            ServerEvent::RideAccepted { .. } => "ride_accepted",
            ServerEvent::RideExpired { .. } => "ride_expired",
            ServerEvent::RideCancelled { .. } => "ride_cancelled",
            ServerEvent::RideCompleted { .. } => "ride_completed",
            ServerEvent::NoDriversAvailable { .. } => "no_drivers_available",
            ServerEvent::DriverTrackLocation { .. } => "driver_track_location",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parses_subscribe_nearby() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "subscribe_nearby", "latitude": 28.6139, "longitude": 77.2090, "radius_m": 1500}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::SubscribeNearby {
                latitude,
                longitude,
                radius_m,
            } => {
                assert_eq!(latitude, 28.6139);
                assert_eq!(longitude, 77.2090);
                assert_eq!(radius_m, Some(1500.0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_client_message_parses_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_client_message_rejects_unknown_type() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type": "teleport", "latitude": 0.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_type_tags() {
        let event = ServerEvent::error("boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");

        let event = ServerEvent::NoDriversAvailable {
            ride_id: Uuid::new_v4(),
            message: "No drivers found nearby".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "no_drivers_available");
        assert!(json["ride_id"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let event = ServerEvent::Pong {
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }

    #[test]
    fn test_driver_location_updated_skips_empty_fields() {
        let event = ServerEvent::DriverLocationUpdated {
            driver_id: Uuid::new_v4(),
            latitude: 28.6139,
            longitude: 77.2090,
            username: None,
            vehicle_number: None,
            tile: Some("ttnfv2".to_string()),
            distance_m: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("username").is_none());
        assert!(json.get("distance_m").is_none());
        assert_eq!(json["tile"], "ttnfv2");
    }
}
