//! Daisy-chain offer matcher.
//!
//! Builds the ordered driver queue for a ride from the presence index, then
//! walks it one offer at a time: dispatch to the closest unserved driver,
//! arm the expiry timer, and advance on timeout or rejection. When the
//! queue drains with the ride still pending, the ride settles as
//! no_drivers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use domain::error::DispatchError;
use domain::events::ServerEvent;
use domain::models::{DriverStatus, RideOffer, RideRequest, RideStatus};
use persistence::repositories::{RideOfferRepository, RideRequestRepository};

use super::db_error;
use super::offer_timers::OfferTimers;
use super::presence::PresenceIndex;
use super::registry::{driver_group, party_group, SessionRegistry};

/// Message shown to a driver whose offer timed out.
const OFFER_TIMEOUT_MESSAGE: &str = "Your ride offer has timed out.";

/// Message shown to a passenger whose dispatched queue drained.
const QUEUE_DRAINED_MESSAGE: &str =
    "No drivers accepted your ride request. Please try again later.";

/// Message shown to a passenger when no candidates existed at all.
const NO_CANDIDATES_MESSAGE: &str = "No drivers found nearby.";

/// Per-ride ordered offer queue with timed single-driver dispatch.
pub struct OfferMatcher {
    pool: PgPool,
    presence: Arc<PresenceIndex>,
    registry: Arc<SessionRegistry>,
    timers: Arc<OfferTimers>,
    offer_timeout: Duration,
    // Handed to expiry timers so a firing timer can drive the advance
    // logic without an ownership cycle.
    self_handle: Weak<OfferMatcher>,
}

impl OfferMatcher {
    pub fn new(
        pool: PgPool,
        presence: Arc<PresenceIndex>,
        registry: Arc<SessionRegistry>,
        timers: Arc<OfferTimers>,
        offer_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_handle| Self {
            pool,
            presence,
            registry,
            timers,
            offer_timeout,
            self_handle: self_handle.clone(),
        })
    }

    fn offers(&self) -> RideOfferRepository {
        RideOfferRepository::new(self.pool.clone())
    }

    fn rides(&self) -> RideRequestRepository {
        RideRequestRepository::new(self.pool.clone())
    }

    /// Build the ordered offer queue for a ride: available drivers within
    /// the broadcast radius, closest first. Replaces any prior queue
    /// atomically.
    pub async fn build_offers(&self, ride: &RideRequest) -> Result<Vec<RideOffer>, DispatchError> {
        let radius_m = f64::from(ride.broadcast_radius_m);
        let nearby = self.presence.query_nearby(
            ride.pickup_latitude,
            ride.pickup_longitude,
            radius_m,
            None,
            Some(DriverStatus::Available),
        );

        // The tile cover over-approximates; keep only drivers actually
        // inside the radius (inclusive bound).
        let candidates: Vec<Uuid> = nearby
            .iter()
            .filter(|driver| driver.distance_m <= radius_m)
            .map(|driver| driver.driver_id)
            .collect();

        let offers = self
            .offers()
            .replace_for_ride(ride.id, &candidates)
            .await
            .map_err(db_error)?;

        counter!("ride_offers_built_total").increment(offers.len() as u64);
        info!(
            ride_id = %ride.id,
            offers = offers.len(),
            radius_m = ride.broadcast_radius_m,
            "Built offer queue"
        );

        Ok(offers.into_iter().map(|entity| entity.into_domain()).collect())
    }

    /// Dispatch the next unsent pending offer of a ride, if any.
    ///
    /// Claims the offer by stamping `sent_at` atomically, arms its expiry
    /// timer, and pushes `ride_offer` to the driver. Returns false when the
    /// queue has no unsent offer left.
    pub async fn dispatch_next(&self, ride_id: Uuid) -> Result<bool, DispatchError> {
        let Some(claimed) = self
            .offers()
            .claim_next_unsent(ride_id)
            .await
            .map_err(db_error)?
        else {
            return Ok(false);
        };

        let Some(ride) = self.rides().find_by_id(ride_id).await.map_err(db_error)? else {
            warn!(ride_id = %ride_id, "Dispatched offer for a ride that no longer exists");
            return Ok(false);
        };

        let offer_id = claimed.id;
        if let Some(matcher) = self.self_handle.upgrade() {
            self.timers.schedule(offer_id, self.offer_timeout, move || {
                Box::pin(async move {
                    matcher.expire_from_timer(offer_id).await;
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            });
        }

        let delivered = self.registry.send_to_group(
            &driver_group(claimed.driver_id),
            &ServerEvent::RideOffer {
                offer_id,
                ride: ride.into_domain(),
                expires_in_s: self.offer_timeout.as_secs(),
                timestamp: Utc::now(),
            },
        );

        counter!("ride_offers_dispatched_total").increment(1);
        info!(
            ride_id = %ride_id,
            offer_id = %offer_id,
            driver_id = %claimed.driver_id,
            order = claimed.offer_order,
            delivered,
            "Dispatched ride offer"
        );

        Ok(true)
    }

    /// Expire an offer (if still pending) and advance the daisy-chain.
    ///
    /// Safe to call any number of times for the same offer: the status CAS
    /// makes exactly one caller perform the expiry, all others no-op.
    pub async fn expire_and_advance(&self, offer_id: Uuid) {
        self.timers.cancel(offer_id);
        self.expire_offer(offer_id).await;
    }

    /// Expiry entry point for the offer's own timer task, which must not
    /// abort itself.
    async fn expire_from_timer(&self, offer_id: Uuid) {
        self.timers.forget(offer_id);
        self.expire_offer(offer_id).await;
    }

    async fn expire_offer(&self, offer_id: Uuid) {
        let expired = match self.offers().expire_if_pending(offer_id).await {
            Ok(Some(offer)) => offer,
            Ok(None) => {
                debug!(offer_id = %offer_id, "Offer already resolved; expiry is a no-op");
                return;
            }
            Err(e) => {
                error!(offer_id = %offer_id, error = %e, "Failed to expire offer");
                return;
            }
        };

        counter!("ride_offers_expired_total").increment(1);
        self.registry.send_to_group(
            &driver_group(expired.driver_id),
            &ServerEvent::RideExpired {
                ride_id: expired.ride_id,
                message: OFFER_TIMEOUT_MESSAGE.to_string(),
                timestamp: Utc::now(),
            },
        );

        self.advance(expired.ride_id).await;
    }

    /// Resolve a driver's pending offer as rejected and advance.
    ///
    /// Returns whether a next driver was queued.
    pub async fn reject_and_advance(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
    ) -> Result<bool, DispatchError> {
        let Some(rejected) = self
            .offers()
            .reject_if_pending(ride_id, driver_id)
            .await
            .map_err(db_error)?
        else {
            return Err(DispatchError::OfferNotFound);
        };

        self.timers.cancel(rejected.id);
        counter!("ride_offers_rejected_total").increment(1);
        info!(
            ride_id = %ride_id,
            offer_id = %rejected.id,
            driver_id = %driver_id,
            "Driver rejected offer"
        );

        Ok(self.advance(ride_id).await)
    }

    /// Notify the passenger that their pending ride ran out of drivers.
    ///
    /// `ride_expired` when at least one offer had been dispatched (a driver
    /// saw it and let it lapse), `no_drivers_available` when the queue was
    /// empty from the start.
    pub fn notify_queue_drained(&self, ride: &RideRequest, any_offer_sent: bool) {
        let event = if any_offer_sent {
            ServerEvent::RideExpired {
                ride_id: ride.id,
                message: QUEUE_DRAINED_MESSAGE.to_string(),
                timestamp: Utc::now(),
            }
        } else {
            ServerEvent::NoDriversAvailable {
                ride_id: ride.id,
                message: NO_CANDIDATES_MESSAGE.to_string(),
                timestamp: Utc::now(),
            }
        };
        self.registry
            .send_to_group(&party_group(ride.passenger_id), &event);
    }

    /// Try to dispatch the next offer; when the queue is drained and the
    /// ride is still pending, settle it as no_drivers and tell the
    /// passenger. Returns whether a next offer went out.
    fn advance(&self, ride_id: Uuid) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            match self.dispatch_next(ride_id).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    error!(ride_id = %ride_id, error = %e, "Failed to dispatch next offer");
                    return false;
                }
            }

            let pending = match self.offers().count_pending(ride_id).await {
                Ok(count) => count,
                Err(e) => {
                    error!(ride_id = %ride_id, error = %e, "Failed to count pending offers");
                    return false;
                }
            };
            if pending > 0 {
                // An in-flight offer is still awaiting its driver; nothing to
                // settle yet.
                return false;
            }

            match self.rides().mark_no_drivers_if_pending(ride_id).await {
                Ok(true) => {
                    counter!("rides_no_drivers_total").increment(1);
                    if let Ok(Some(ride)) = self.rides().find_by_id(ride_id).await {
                        let ride = ride.into_domain();
                        debug_assert_eq!(ride.status, RideStatus::NoDrivers);
                        let any_sent = self.offers().any_sent(ride_id).await.unwrap_or(false);
                        self.notify_queue_drained(&ride, any_sent);
                    }
                    info!(ride_id = %ride_id, "Offer queue drained; ride settled as no_drivers");
                }
                Ok(false) => {
                    // Someone accepted or cancelled between the drain check and
                    // the settle; their transition wins.
                }
                Err(e) => {
                    error!(ride_id = %ride_id, error = %e, "Failed to settle drained ride");
                }
            }

            false
        })
    }
}
