//! Ride request domain model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Ride Status Enum
// ============================================================================

/// State of a ride request in its lifecycle.
///
/// ```text
/// pending --accept--> accepted --complete--> completed
///    |                   |  \--cancel-driver--> cancelled_driver
///    |                   \--cancel-user--> cancelled_user
///    +--cancel-user--> cancelled_user
///    +--(offer queue drained)--> no_drivers
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    NoDrivers,
    Completed,
    CancelledUser,
    CancelledDriver,
}

impl RideStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::NoDrivers => "no_drivers",
            RideStatus::Completed => "completed",
            RideStatus::CancelledUser => "cancelled_user",
            RideStatus::CancelledDriver => "cancelled_driver",
        }
    }

    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::NoDrivers
                | RideStatus::Completed
                | RideStatus::CancelledUser
                | RideStatus::CancelledDriver
        )
    }

    /// A ride counts against the one-active-ride-per-passenger invariant
    /// while in one of these states.
    pub fn is_active(&self) -> bool {
        matches!(self, RideStatus::Pending | RideStatus::Accepted)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: RideStatus) -> bool {
        match (self, target) {
            (RideStatus::Pending, RideStatus::Accepted) => true,
            (RideStatus::Pending, RideStatus::NoDrivers) => true,
            (RideStatus::Pending, RideStatus::CancelledUser) => true,
            (RideStatus::Accepted, RideStatus::Completed) => true,
            (RideStatus::Accepted, RideStatus::CancelledUser) => true,
            (RideStatus::Accepted, RideStatus::CancelledDriver) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RideStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RideStatus::Pending),
            "accepted" => Ok(RideStatus::Accepted),
            "no_drivers" => Ok(RideStatus::NoDrivers),
            "completed" => Ok(RideStatus::Completed),
            "cancelled_user" => Ok(RideStatus::CancelledUser),
            "cancelled_driver" => Ok(RideStatus::CancelledDriver),
            _ => Err(format!("Invalid ride status: {}", s)),
        }
    }
}

// ============================================================================
// Core Model
// ============================================================================

/// A passenger's booking, the authoritative lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub number_of_passengers: i32,
    pub broadcast_radius_m: i32,
    pub status: RideStatus,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Request payload for creating a ride.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRideRequest {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub pickup_latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub pickup_longitude: f64,

    #[validate(length(max = 500, message = "pickup_address must be at most 500 characters"))]
    pub pickup_address: Option<String>,

    #[validate(length(max = 500, message = "dropoff_address must be at most 500 characters"))]
    pub dropoff_address: Option<String>,

    #[serde(default = "default_passenger_count")]
    #[validate(custom(function = "shared::validation::validate_passenger_count"))]
    pub number_of_passengers: i32,

    /// Search radius for candidate drivers; the configured default applies
    /// when omitted.
    pub broadcast_radius_m: Option<i32>,
}

fn default_passenger_count() -> i32 {
    1
}

/// Request payload for cancelling a ride.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CancelRideRequest {
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Response for ride creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRideResponse {
    pub ride: RideRequest,
    pub driver_candidates: usize,
}

/// Response for the passenger's current-ride poll.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentRideResponse {
    pub has_active_ride: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride: Option<RideRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RideStatus>,
}

/// Response for a passenger cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct CancelRideResponse {
    pub ride: RideRequest,
    pub was_assigned: bool,
}

/// Response for a driver rejection.
#[derive(Debug, Clone, Serialize)]
pub struct RejectRideResponse {
    pub queued_next_driver: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            RideStatus::Pending,
            RideStatus::Accepted,
            RideStatus::NoDrivers,
            RideStatus::Completed,
            RideStatus::CancelledUser,
            RideStatus::CancelledDriver,
        ] {
            assert_eq!(status.as_str().parse::<RideStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let all = [
            RideStatus::Pending,
            RideStatus::Accepted,
            RideStatus::NoDrivers,
            RideStatus::Completed,
            RideStatus::CancelledUser,
            RideStatus::CancelledDriver,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(
                    !from.can_transition_to(to),
                    "{from} must not transition to {to}"
                );
            }
        }
    }

    #[test]
    fn test_pending_transitions() {
        assert!(RideStatus::Pending.can_transition_to(RideStatus::Accepted));
        assert!(RideStatus::Pending.can_transition_to(RideStatus::NoDrivers));
        assert!(RideStatus::Pending.can_transition_to(RideStatus::CancelledUser));
        assert!(!RideStatus::Pending.can_transition_to(RideStatus::Completed));
        assert!(!RideStatus::Pending.can_transition_to(RideStatus::CancelledDriver));
    }

    #[test]
    fn test_accepted_transitions() {
        assert!(RideStatus::Accepted.can_transition_to(RideStatus::Completed));
        assert!(RideStatus::Accepted.can_transition_to(RideStatus::CancelledUser));
        assert!(RideStatus::Accepted.can_transition_to(RideStatus::CancelledDriver));
        assert!(!RideStatus::Accepted.can_transition_to(RideStatus::Pending));
        assert!(!RideStatus::Accepted.can_transition_to(RideStatus::NoDrivers));
    }

    #[test]
    fn test_active_states() {
        assert!(RideStatus::Pending.is_active());
        assert!(RideStatus::Accepted.is_active());
        assert!(!RideStatus::NoDrivers.is_active());
        assert!(!RideStatus::Completed.is_active());
    }

    #[test]
    fn test_no_drivers_is_terminal() {
        // A no_drivers ride cannot be cancelled: it is already settled.
        assert!(RideStatus::NoDrivers.is_terminal());
        assert!(!RideStatus::NoDrivers.can_transition_to(RideStatus::CancelledUser));
    }

    #[test]
    fn test_create_ride_request_validation() {
        let valid = CreateRideRequest {
            pickup_latitude: 28.6139,
            pickup_longitude: 77.2090,
            pickup_address: Some("Connaught Place".to_string()),
            dropoff_address: Some("India Gate".to_string()),
            number_of_passengers: 2,
            broadcast_radius_m: Some(1000),
        };
        assert!(valid.validate().is_ok());

        let bad_count = CreateRideRequest {
            number_of_passengers: 0,
            ..valid.clone()
        };
        assert!(bad_count.validate().is_err());

        let bad_lat = CreateRideRequest {
            pickup_latitude: -93.0,
            ..valid
        };
        assert!(bad_lat.validate().is_err());
    }

    #[test]
    fn test_passenger_count_defaults_to_one() {
        let req: CreateRideRequest = serde_json::from_str(
            r#"{"pickup_latitude": 28.6139, "pickup_longitude": 77.2090}"#,
        )
        .unwrap();
        assert_eq!(req.number_of_passengers, 1);
        assert_eq!(req.broadcast_radius_m, None);
    }
}
