//! Ride lifecycle controller.
//!
//! The authoritative state machine over ride requests. Every transition
//! runs as one transaction holding the ride row's lock, which is what
//! serializes racing accepts, cancel-versus-accept, and double creates.
//! State is persisted first; push notifications go out after commit and
//! are best-effort.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use domain::error::DispatchError;
use domain::events::ServerEvent;
use domain::models::{
    ride::CreateRideRequest, DriverStatus, OfferStatus, RideRequest, RideStatus, Role,
};
use persistence::repositories::{
    DriverProfileRepository, RideOfferRepository, RideRequestRepository, RideRequestInput,
    UserRepository,
};

use super::db_error;
use super::matcher::OfferMatcher;
use super::offer_timers::OfferTimers;
use super::registry::{driver_group, party_group, ride_group, SessionRegistry};

/// Validates and applies ride state transitions, orchestrating the matcher
/// and emitting lifecycle events.
pub struct RideLifecycle {
    pool: PgPool,
    registry: Arc<SessionRegistry>,
    matcher: Arc<OfferMatcher>,
    timers: Arc<OfferTimers>,
    default_radius_m: i32,
}

impl RideLifecycle {
    pub fn new(
        pool: PgPool,
        registry: Arc<SessionRegistry>,
        matcher: Arc<OfferMatcher>,
        timers: Arc<OfferTimers>,
        default_radius_m: i32,
    ) -> Self {
        Self {
            pool,
            registry,
            matcher,
            timers,
            default_radius_m,
        }
    }

    fn rides(&self) -> RideRequestRepository {
        RideRequestRepository::new(self.pool.clone())
    }

    /// Create a pending ride for a passenger and start the offer chain.
    ///
    /// Exactly one of two concurrent creates for the same passenger
    /// succeeds; the loser observes ACTIVE_RIDE_EXISTS. A ride with no
    /// candidates settles immediately as no_drivers.
    pub async fn create_request(
        &self,
        passenger_id: Uuid,
        request: &CreateRideRequest,
    ) -> Result<(RideRequest, usize), DispatchError> {
        let radius_m = request
            .broadcast_radius_m
            .unwrap_or(self.default_radius_m);
        if radius_m < 0 {
            return Err(DispatchError::Validation(
                "broadcast_radius_m must be non-negative".to_string(),
            ));
        }

        let input = RideRequestInput {
            passenger_id,
            pickup_latitude: request.pickup_latitude,
            pickup_longitude: request.pickup_longitude,
            pickup_address: request.pickup_address.clone(),
            dropoff_address: request.dropoff_address.clone(),
            number_of_passengers: request.number_of_passengers,
            broadcast_radius_m: radius_m,
        };

        let entity = match self.rides().insert(input).await {
            Ok(entity) => entity,
            Err(e) if RideRequestRepository::is_active_ride_conflict(&e) => {
                return Err(DispatchError::ActiveRideExists);
            }
            Err(e) => return Err(db_error(e)),
        };
        let mut ride = entity.into_domain();
        counter!("rides_created_total").increment(1);
        info!(
            ride_id = %ride.id,
            passenger_id = %passenger_id,
            radius_m,
            "Ride request created"
        );

        let offers = match self.matcher.build_offers(&ride).await {
            Ok(offers) => offers,
            Err(e) => {
                // A degraded presence index means an empty queue, never a
                // failed create.
                error!(ride_id = %ride.id, error = %e, "Offer build failed");
                Vec::new()
            }
        };
        let candidates = offers.len();

        if candidates == 0 {
            match self.rides().mark_no_drivers_if_pending(ride.id).await {
                Ok(true) => {
                    ride.status = RideStatus::NoDrivers;
                    counter!("rides_no_drivers_total").increment(1);
                }
                Ok(false) => {}
                Err(e) => error!(ride_id = %ride.id, error = %e, "Failed to settle empty queue"),
            }
            self.matcher.notify_queue_drained(&ride, false);
        } else if let Err(e) = self.matcher.dispatch_next(ride.id).await {
            error!(ride_id = %ride.id, error = %e, "Initial offer dispatch failed");
        }

        Ok((ride, candidates))
    }

    /// Accept a pending ride on behalf of a driver.
    ///
    /// The ride-row lock decides races: a second acceptance, or an
    /// acceptance racing a passenger cancellation, observes
    /// RIDE_NOT_AVAILABLE. An acceptance racing the offer's expiry is
    /// settled by the offer-status CAS; if expiry won, the driver observes
    /// OFFER_EXPIRED.
    pub async fn accept(
        &self,
        driver_id: Uuid,
        ride_id: Uuid,
    ) -> Result<RideRequest, DispatchError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(entity) = RideRequestRepository::find_by_id_for_update(&mut tx, ride_id)
            .await
            .map_err(db_error)?
        else {
            return Err(DispatchError::RideNotFound);
        };
        let mut ride = entity.into_domain();
        if ride.status != RideStatus::Pending {
            return Err(DispatchError::RideNotAvailable);
        }

        let Some(profile) = DriverProfileRepository::find_by_user_id_for_update(&mut tx, driver_id)
            .await
            .map_err(db_error)?
        else {
            return Err(DispatchError::DriverNotAvailable);
        };
        if profile.into_domain().status != DriverStatus::Available {
            return Err(DispatchError::DriverNotAvailable);
        }

        let offers = RideOfferRepository::list_for_ride_tx(&mut tx, ride_id)
            .await
            .map_err(db_error)?;
        // Rides created before the matcher existed have no offer rows and
        // bypass the offer guard.
        let my_offer_id = if offers.is_empty() {
            None
        } else {
            let mine = offers
                .iter()
                .find(|offer| offer.driver_id == driver_id)
                .ok_or(DispatchError::OfferNotFound)?;
            match mine.status.parse::<OfferStatus>() {
                Ok(OfferStatus::Pending) => Some(mine.id),
                Ok(OfferStatus::Expired) => return Err(DispatchError::OfferExpired),
                _ => return Err(DispatchError::OfferNotFound),
            }
        };

        let now = Utc::now();
        let updated = RideRequestRepository::mark_accepted_tx(&mut tx, ride_id, driver_id, now)
            .await
            .map_err(db_error)?;
        if updated == 0 {
            return Err(DispatchError::RideNotAvailable);
        }
        DriverProfileRepository::update_status_tx(&mut tx, driver_id, DriverStatus::Busy.as_str())
            .await
            .map_err(db_error)?;

        if let Some(offer_id) = my_offer_id {
            let accepted = RideOfferRepository::accept_if_pending_tx(&mut tx, offer_id)
                .await
                .map_err(db_error)?;
            if accepted.is_none() {
                // The timer or sweeper expired this offer between the guard
                // read and the CAS; the expiry wins and this accept
                // rolls back.
                return Err(DispatchError::OfferExpired);
            }
        }
        let retired = RideOfferRepository::expire_other_pending_tx(&mut tx, ride_id, my_offer_id)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        self.timers
            .cancel_all(my_offer_id.into_iter().chain(retired.iter().map(|o| o.id)));

        ride.status = RideStatus::Accepted;
        ride.driver_id = Some(driver_id);
        ride.accepted_at = Some(now);

        let timestamp = Utc::now();
        self.registry.send_to_group(
            &party_group(ride.passenger_id),
            &ServerEvent::RideAccepted {
                ride_id,
                driver_id,
                ride: Some(ride.clone()),
                message: "Your ride has been accepted.".to_string(),
                timestamp,
            },
        );
        // Drivers whose in-flight offer was retired learn the ride is gone;
        // drivers never dispatched to were never told anything.
        for offer in retired.iter().filter(|offer| offer.sent_at.is_some()) {
            self.registry.send_to_group(
                &driver_group(offer.driver_id),
                &ServerEvent::RideAccepted {
                    ride_id,
                    driver_id,
                    ride: None,
                    message: "This ride has been accepted by another driver.".to_string(),
                    timestamp,
                },
            );
        }

        counter!("rides_accepted_total").increment(1);
        info!(
            ride_id = %ride_id,
            driver_id = %driver_id,
            retired = retired.len(),
            "Ride accepted"
        );

        Ok(ride)
    }

    /// Reject a pending offer on behalf of a driver and advance the chain.
    ///
    /// Returns whether a next driver was queued.
    pub async fn reject(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, DispatchError> {
        let Some(entity) = self.rides().find_by_id(ride_id).await.map_err(db_error)? else {
            return Err(DispatchError::RideNotFound);
        };
        if entity.into_domain().status != RideStatus::Pending {
            return Err(DispatchError::RideNotAvailable);
        }

        self.matcher.reject_and_advance(ride_id, driver_id).await
    }

    /// Cancel a ride on behalf of its passenger.
    ///
    /// Allowed from any non-terminal state; a ride already settled as
    /// no_drivers (or finished) observes RIDE_NOT_CANCELLABLE. Returns the
    /// ride and whether a driver had been assigned.
    pub async fn cancel_by_passenger(
        &self,
        passenger_id: Uuid,
        ride_id: Uuid,
        reason: Option<String>,
    ) -> Result<(RideRequest, bool), DispatchError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(entity) = RideRequestRepository::find_by_id_for_update(&mut tx, ride_id)
            .await
            .map_err(db_error)?
        else {
            return Err(DispatchError::RideNotFound);
        };
        let mut ride = entity.into_domain();
        if ride.passenger_id != passenger_id {
            return Err(DispatchError::RideNotFound);
        }
        if ride.status.is_terminal() {
            return Err(DispatchError::RideNotCancellable);
        }

        let was_assigned = ride.driver_id.is_some();
        let now = Utc::now();
        RideRequestRepository::mark_cancelled_tx(
            &mut tx,
            ride_id,
            RideStatus::CancelledUser.as_str(),
            reason.as_deref(),
            now,
        )
        .await
        .map_err(db_error)?;

        if let Some(assigned) = ride.driver_id {
            DriverProfileRepository::update_status_tx(
                &mut tx,
                assigned,
                DriverStatus::Available.as_str(),
            )
            .await
            .map_err(db_error)?;
        }
        let retired = RideOfferRepository::expire_other_pending_tx(&mut tx, ride_id, None)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        self.timers.cancel_all(retired.iter().map(|o| o.id));

        ride.status = RideStatus::CancelledUser;
        ride.cancelled_at = Some(now);
        ride.cancellation_reason = reason.clone();

        let event = ServerEvent::RideCancelled {
            ride_id,
            cancelled_by: Role::Passenger,
            reason,
            timestamp: Utc::now(),
        };
        if let Some(assigned) = ride.driver_id {
            self.registry.send_to_group(&driver_group(assigned), &event);
        }
        // Drivers holding a just-retired in-flight offer have seen the ride
        // and not yet been told it resolved.
        for offer in retired.iter().filter(|offer| offer.sent_at.is_some()) {
            if ride.driver_id == Some(offer.driver_id) {
                continue;
            }
            self.registry
                .send_to_group(&driver_group(offer.driver_id), &event);
        }
        self.registry.send_to_group(&ride_group(ride_id), &event);

        counter!("rides_cancelled_total", "by" => "passenger").increment(1);
        info!(
            ride_id = %ride_id,
            passenger_id = %passenger_id,
            was_assigned,
            "Ride cancelled by passenger"
        );

        Ok((ride, was_assigned))
    }

    /// Cancel an accepted ride on behalf of its assigned driver.
    pub async fn cancel_by_driver(
        &self,
        driver_id: Uuid,
        ride_id: Uuid,
        reason: Option<String>,
    ) -> Result<RideRequest, DispatchError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(entity) = RideRequestRepository::find_by_id_for_update(&mut tx, ride_id)
            .await
            .map_err(db_error)?
        else {
            return Err(DispatchError::RideNotFound);
        };
        let mut ride = entity.into_domain();
        if ride.driver_id != Some(driver_id) || ride.status != RideStatus::Accepted {
            return Err(DispatchError::RideNotFound);
        }

        let now = Utc::now();
        RideRequestRepository::mark_cancelled_tx(
            &mut tx,
            ride_id,
            RideStatus::CancelledDriver.as_str(),
            reason.as_deref(),
            now,
        )
        .await
        .map_err(db_error)?;
        DriverProfileRepository::update_status_tx(
            &mut tx,
            driver_id,
            DriverStatus::Available.as_str(),
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        ride.status = RideStatus::CancelledDriver;
        ride.cancelled_at = Some(now);
        ride.cancellation_reason = reason.clone();

        let event = ServerEvent::RideCancelled {
            ride_id,
            cancelled_by: Role::Driver,
            reason,
            timestamp: Utc::now(),
        };
        self.registry
            .send_to_group(&party_group(ride.passenger_id), &event);
        self.registry.send_to_group(&ride_group(ride_id), &event);

        counter!("rides_cancelled_total", "by" => "driver").increment(1);
        info!(ride_id = %ride_id, driver_id = %driver_id, "Ride cancelled by driver");

        Ok(ride)
    }

    /// Complete an accepted ride on behalf of its assigned driver.
    ///
    /// Increments both participants' completed-ride counters and returns
    /// the driver to the available pool.
    pub async fn complete(
        &self,
        driver_id: Uuid,
        ride_id: Uuid,
    ) -> Result<RideRequest, DispatchError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(entity) = RideRequestRepository::find_by_id_for_update(&mut tx, ride_id)
            .await
            .map_err(db_error)?
        else {
            return Err(DispatchError::RideNotFound);
        };
        let mut ride = entity.into_domain();
        if ride.driver_id != Some(driver_id) || ride.status != RideStatus::Accepted {
            return Err(DispatchError::RideNotFound);
        }

        let now = Utc::now();
        let updated = RideRequestRepository::mark_completed_tx(&mut tx, ride_id, now)
            .await
            .map_err(db_error)?;
        if updated == 0 {
            return Err(DispatchError::RideNotFound);
        }
        UserRepository::increment_completed_rides_tx(&mut tx, ride.passenger_id, driver_id)
            .await
            .map_err(db_error)?;
        DriverProfileRepository::update_status_tx(
            &mut tx,
            driver_id,
            DriverStatus::Available.as_str(),
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        ride.status = RideStatus::Completed;
        ride.completed_at = Some(now);

        let event = ServerEvent::RideCompleted {
            ride_id,
            ride: ride.clone(),
            timestamp: Utc::now(),
        };
        self.registry
            .send_to_group(&party_group(ride.passenger_id), &event);
        self.registry.send_to_group(&ride_group(ride_id), &event);

        counter!("rides_completed_total").increment(1);
        info!(ride_id = %ride_id, driver_id = %driver_id, "Ride completed");

        Ok(ride)
    }
}
