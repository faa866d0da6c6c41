//! Ride request entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{RideRequest, RideStatus};

/// Database row mapping for the ride_requests table.
#[derive(Debug, Clone, FromRow)]
pub struct RideRequestEntity {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub number_of_passengers: i32,
    pub broadcast_radius_m: i32,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl RideRequestEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> RideRequest {
        let status = self.status.parse::<RideStatus>().unwrap_or(RideStatus::Pending);

        RideRequest {
            id: self.id,
            passenger_id: self.passenger_id,
            driver_id: self.driver_id,
            pickup_latitude: self.pickup_latitude,
            pickup_longitude: self.pickup_longitude,
            pickup_address: self.pickup_address,
            dropoff_address: self.dropoff_address,
            number_of_passengers: self.number_of_passengers,
            broadcast_radius_m: self.broadcast_radius_m,
            status,
            requested_at: self.requested_at,
            accepted_at: self.accepted_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
        }
    }
}

impl From<RideRequestEntity> for RideRequest {
    fn from(entity: RideRequestEntity) -> Self {
        entity.into_domain()
    }
}
