//! Ride offer entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{OfferStatus, RideOffer};

/// Database row mapping for the ride_offers table.
#[derive(Debug, Clone, FromRow)]
pub struct RideOfferEntity {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub offer_order: i32,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RideOfferEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> RideOffer {
        let status = self.status.parse::<OfferStatus>().unwrap_or(OfferStatus::Pending);

        RideOffer {
            id: self.id,
            ride_id: self.ride_id,
            driver_id: self.driver_id,
            order: self.offer_order,
            status,
            sent_at: self.sent_at,
            responded_at: self.responded_at,
            created_at: self.created_at,
        }
    }
}

impl From<RideOfferEntity> for RideOffer {
    fn from(entity: RideOfferEntity) -> Self {
        entity.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_domain_maps_order_column() {
        let entity = RideOfferEntity {
            id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            offer_order: 2,
            status: "expired".to_string(),
            sent_at: Some(Utc::now()),
            responded_at: Some(Utc::now()),
            created_at: Utc::now(),
        };

        let offer = entity.into_domain();
        assert_eq!(offer.order, 2);
        assert_eq!(offer.status, OfferStatus::Expired);
        assert!(!offer.is_in_flight());
    }
}
