//! Driver profile entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{DriverProfile, DriverStatus};

/// Database row mapping for the driver_profiles table.
#[derive(Debug, Clone, FromRow)]
pub struct DriverProfileEntity {
    pub user_id: Uuid,
    pub vehicle_number: String,
    pub status: String,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub last_location_update: Option<DateTime<Utc>>,
}

impl DriverProfileEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> DriverProfile {
        let status = self
            .status
            .parse::<DriverStatus>()
            .unwrap_or(DriverStatus::Offline);

        DriverProfile {
            user_id: self.user_id,
            vehicle_number: self.vehicle_number,
            status,
            current_latitude: self.current_latitude,
            current_longitude: self.current_longitude,
            last_location_update: self.last_location_update,
        }
    }
}

impl From<DriverProfileEntity> for DriverProfile {
    fn from(entity: DriverProfileEntity) -> Self {
        entity.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_domain_parses_status() {
        let entity = DriverProfileEntity {
            user_id: Uuid::new_v4(),
            vehicle_number: "DL1RT1234".to_string(),
            status: "available".to_string(),
            current_latitude: Some(28.6139),
            current_longitude: Some(77.2090),
            last_location_update: Some(Utc::now()),
        };

        let profile = entity.into_domain();
        assert_eq!(profile.status, DriverStatus::Available);
        assert_eq!(profile.position(), Some((28.6139, 77.2090)));
    }

    #[test]
    fn test_into_domain_defaults_unknown_status_to_offline() {
        let entity = DriverProfileEntity {
            user_id: Uuid::new_v4(),
            vehicle_number: "DL1RT1234".to_string(),
            status: "sleeping".to_string(),
            current_latitude: None,
            current_longitude: None,
            last_location_update: None,
        };

        assert_eq!(entity.into_domain().status, DriverStatus::Offline);
    }
}
