//! Ride offer domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// State of a single offer in a ride's daisy-chain queue.
///
/// Transitions are monotone: `pending` resolves to exactly one of
/// `accepted`, `rejected`, or `expired` and never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl OfferStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OfferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OfferStatus::Pending),
            "accepted" => Ok(OfferStatus::Accepted),
            "rejected" => Ok(OfferStatus::Rejected),
            "expired" => Ok(OfferStatus::Expired),
            _ => Err(format!("Invalid offer status: {}", s)),
        }
    }
}

/// One entry of a ride's ordered driver queue.
///
/// `order` 0 is the closest driver at build time; at most one offer per
/// ride is in flight at any moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideOffer {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub order: i32,
    pub status: OfferStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RideOffer {
    /// An offer is in flight while it has been sent to its driver and no
    /// response or timeout has resolved it.
    pub fn is_in_flight(&self) -> bool {
        self.status == OfferStatus::Pending && self.sent_at.is_some() && self.responded_at.is_none()
    }
}
