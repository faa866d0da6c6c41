//! Driver availability and location operations.
//!
//! Shared by the HTTP routes and the driver socket: persist the change on
//! the profile (named fields only), then let the broadcast fabric move the
//! presence index and notify subscribed passengers.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use domain::error::DispatchError;
use domain::models::{DriverProfile, DriverStatus};
use persistence::repositories::{DriverProfileRepository, RideRequestRepository};

use super::broadcast::{BroadcastFabric, BroadcastReport};
use super::db_error;
use super::presence::DriverMeta;

/// Driver-facing state changes outside the ride lifecycle.
pub struct DriverState {
    pool: PgPool,
    fabric: Arc<BroadcastFabric>,
}

impl DriverState {
    pub fn new(pool: PgPool, fabric: Arc<BroadcastFabric>) -> Self {
        Self { pool, fabric }
    }

    fn profiles(&self) -> DriverProfileRepository {
        DriverProfileRepository::new(self.pool.clone())
    }

    async fn require_profile(&self, driver_id: Uuid) -> Result<DriverProfile, DispatchError> {
        self.profiles()
            .find_by_user_id(driver_id)
            .await
            .map_err(db_error)?
            .map(|entity| entity.into_domain())
            .ok_or(DispatchError::DriverNotAvailable)
    }

    async fn meta_for(&self, driver_id: Uuid) -> DriverMeta {
        match self.profiles().find_identity(driver_id).await {
            Ok(Some(identity)) => DriverMeta {
                username: Some(identity.username),
                vehicle_number: Some(identity.vehicle_number),
            },
            _ => DriverMeta::default(),
        }
    }

    /// Flip a driver between available and offline.
    ///
    /// `busy` belongs to the ride lifecycle and is rejected here, and a
    /// driver cannot leave `busy` while a ride assigned to them is still
    /// accepted.
    pub async fn set_status(
        &self,
        driver_id: Uuid,
        status: DriverStatus,
    ) -> Result<DriverStatus, DispatchError> {
        if status == DriverStatus::Busy {
            return Err(DispatchError::Validation(
                "busy is managed by the ride lifecycle".to_string(),
            ));
        }

        let profile = self.require_profile(driver_id).await?;
        if profile.status == DriverStatus::Busy {
            let active = RideRequestRepository::new(self.pool.clone())
                .find_accepted_for_driver(driver_id)
                .await
                .map_err(db_error)?;
            if active.is_some() {
                return Err(DispatchError::Validation(
                    "status cannot change while a ride is in progress".to_string(),
                ));
            }
        }

        self.profiles()
            .update_status(driver_id, status.as_str())
            .await
            .map_err(db_error)?;

        let meta = self.meta_for(driver_id).await;
        self.fabric
            .broadcast_driver_status(driver_id, status, profile.position(), Some(meta));

        info!(driver_id = %driver_id, status = %status, "Driver status updated");
        Ok(status)
    }

    /// Ingest a driver position fix: persist it on the profile and push it
    /// through the broadcast fabric.
    pub async fn report_location(
        &self,
        driver_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<BroadcastReport, DispatchError> {
        let profile = self.require_profile(driver_id).await?;

        self.profiles()
            .update_location(driver_id, latitude, longitude)
            .await
            .map_err(db_error)?;

        let meta = self.meta_for(driver_id).await;
        let report = self.fabric.broadcast_driver_location(
            driver_id,
            latitude,
            longitude,
            meta,
            profile.status,
            false,
        );

        Ok(report)
    }

    /// Current profile for a driver.
    pub async fn profile(&self, driver_id: Uuid) -> Result<DriverProfile, DispatchError> {
        self.require_profile(driver_id).await
    }

    /// Create or update the driver's profile (vehicle number).
    pub async fn upsert_profile(
        &self,
        driver_id: Uuid,
        vehicle_number: &str,
    ) -> Result<DriverProfile, DispatchError> {
        let entity = self
            .profiles()
            .upsert(driver_id, vehicle_number)
            .await
            .map_err(db_error)?;
        Ok(entity.into_domain())
    }
}
