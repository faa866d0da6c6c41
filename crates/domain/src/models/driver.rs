//! Driver profile domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Availability status of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Offline,
    Available,
    Busy,
}

impl DriverStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Offline => "offline",
            DriverStatus::Available => "available",
            DriverStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DriverStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(DriverStatus::Offline),
            "available" => Ok(DriverStatus::Available),
            "busy" => Ok(DriverStatus::Busy),
            _ => Err(format!(
                "Invalid driver status: {}. Must be one of: offline, available, busy",
                s
            )),
        }
    }
}

/// Driver-specific details and availability.
///
/// `status = busy` holds exactly while a ride assigned to this driver is
/// accepted; `status = offline` implies absence from the presence index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub user_id: Uuid,
    pub vehicle_number: String,
    pub status: DriverStatus,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub last_location_update: Option<DateTime<Utc>>,
}

impl DriverProfile {
    /// Last known position, when one has been reported.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.current_latitude, self.current_longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Request payload for creating or updating a driver profile.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpsertDriverProfileRequest {
    #[validate(length(min = 1, max = 20, message = "vehicle_number must be 1-20 characters"))]
    pub vehicle_number: String,
}

/// Request payload for a driver status change.
///
/// Only `available` and `offline` are accepted from clients; `busy` is
/// owned by the ride lifecycle.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDriverStatusRequest {
    pub status: DriverStatus,
}

/// Request payload for a driver location report.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateDriverLocationRequest {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_status_round_trip() {
        for status in [
            DriverStatus::Offline,
            DriverStatus::Available,
            DriverStatus::Busy,
        ] {
            assert_eq!(status.as_str().parse::<DriverStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_driver_status_rejects_unknown() {
        assert!("AVAILABLE".parse::<DriverStatus>().is_err());
        assert!("on_break".parse::<DriverStatus>().is_err());
    }

    #[test]
    fn test_position_requires_both_coordinates() {
        let mut profile = DriverProfile {
            user_id: Uuid::new_v4(),
            vehicle_number: "DL1RT1234".to_string(),
            status: DriverStatus::Available,
            current_latitude: Some(28.6139),
            current_longitude: None,
            last_location_update: None,
        };
        assert_eq!(profile.position(), None);

        profile.current_longitude = Some(77.2090);
        assert_eq!(profile.position(), Some((28.6139, 77.2090)));
    }

    #[test]
    fn test_location_request_validation() {
        let valid = UpdateDriverLocationRequest {
            latitude: 28.6139,
            longitude: 77.2090,
        };
        assert!(valid.validate().is_ok());

        let invalid = UpdateDriverLocationRequest {
            latitude: 91.0,
            longitude: 77.2090,
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_vehicle_number_length() {
        let too_long = UpsertDriverProfileRequest {
            vehicle_number: "X".repeat(21),
        };
        assert!(too_long.validate().is_err());

        let ok = UpsertDriverProfileRequest {
            vehicle_number: "DL1RT1234".to_string(),
        };
        assert!(ok.validate().is_ok());
    }
}
