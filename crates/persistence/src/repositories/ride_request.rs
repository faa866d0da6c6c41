//! Ride request repository for database operations.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::RideRequestEntity;
use crate::metrics::QueryTimer;

/// Name of the partial unique index that enforces the one-active-ride
/// invariant. Insert conflicts against it mean the passenger already has a
/// pending or accepted ride.
const ONE_ACTIVE_RIDE_INDEX: &str = "ride_requests_one_active_per_passenger";

/// Input data for inserting a ride request.
#[derive(Debug, Clone)]
pub struct RideRequestInput {
    pub passenger_id: Uuid,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub number_of_passengers: i32,
    pub broadcast_radius_m: i32,
}

/// Repository for ride-request database operations.
#[derive(Clone)]
pub struct RideRequestRepository {
    pool: PgPool,
}

impl RideRequestRepository {
    /// Creates a new RideRequestRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// True when the error is the unique-violation raised by a second
    /// concurrent active ride for the same passenger.
    pub fn is_active_ride_conflict(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => {
                db_err.code().as_deref() == Some("23505")
                    && db_err
                        .constraint()
                        .is_some_and(|name| name == ONE_ACTIVE_RIDE_INDEX)
            }
            _ => false,
        }
    }

    /// Insert a pending ride request.
    ///
    /// The partial unique index serializes concurrent creates for the same
    /// passenger; exactly one of two racing inserts succeeds.
    pub async fn insert(&self, input: RideRequestInput) -> Result<RideRequestEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_ride_request");
        let result = sqlx::query_as::<_, RideRequestEntity>(
            r#"
            INSERT INTO ride_requests (
                passenger_id, pickup_latitude, pickup_longitude, pickup_address,
                dropoff_address, number_of_passengers, broadcast_radius_m
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                      pickup_address, dropoff_address, number_of_passengers,
                      broadcast_radius_m, status, requested_at, accepted_at,
                      completed_at, cancelled_at, cancellation_reason
            "#,
        )
        .bind(input.passenger_id)
        .bind(input.pickup_latitude)
        .bind(input.pickup_longitude)
        .bind(&input.pickup_address)
        .bind(&input.dropoff_address)
        .bind(input.number_of_passengers)
        .bind(input.broadcast_radius_m)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a ride by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<RideRequestEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideRequestEntity>(
            r#"
            SELECT id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                   pickup_address, dropoff_address, number_of_passengers,
                   broadcast_radius_m, status, requested_at, accepted_at,
                   completed_at, cancelled_at, cancellation_reason
            FROM ride_requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find a ride by id and take the row lock, inside a transaction.
    ///
    /// Every state transition goes through this lock; it is what serializes
    /// racing accepts and cancel-versus-accept.
    pub async fn find_by_id_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<RideRequestEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideRequestEntity>(
            r#"
            SELECT id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                   pickup_address, dropoff_address, number_of_passengers,
                   broadcast_radius_m, status, requested_at, accepted_at,
                   completed_at, cancelled_at, cancellation_reason
            FROM ride_requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
    }

    /// The passenger's most recent ride that is still pending, accepted, or
    /// freshly settled as no_drivers (so the client can observe the outcome).
    pub async fn find_current_for_passenger(
        &self,
        passenger_id: Uuid,
    ) -> Result<Option<RideRequestEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideRequestEntity>(
            r#"
            SELECT id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                   pickup_address, dropoff_address, number_of_passengers,
                   broadcast_radius_m, status, requested_at, accepted_at,
                   completed_at, cancelled_at, cancellation_reason
            FROM ride_requests
            WHERE passenger_id = $1 AND status IN ('pending', 'accepted', 'no_drivers')
            ORDER BY requested_at DESC
            LIMIT 1
            "#,
        )
        .bind(passenger_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// The ride currently assigned to a driver, if any.
    pub async fn find_accepted_for_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<RideRequestEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideRequestEntity>(
            r#"
            SELECT id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                   pickup_address, dropoff_address, number_of_passengers,
                   broadcast_radius_m, status, requested_at, accepted_at,
                   completed_at, cancelled_at, cancellation_reason
            FROM ride_requests
            WHERE driver_id = $1 AND status = 'accepted'
            LIMIT 1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Transition a pending ride to accepted, inside a transaction.
    pub async fn mark_accepted_tx(
        conn: &mut PgConnection,
        id: Uuid,
        driver_id: Uuid,
        accepted_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE ride_requests
            SET status = 'accepted', driver_id = $2, accepted_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(driver_id)
        .bind(accepted_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Settle a pending ride as no_drivers. Returns false when the ride is
    /// no longer pending (someone accepted or cancelled first).
    pub async fn mark_no_drivers_if_pending(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE ride_requests
            SET status = 'no_drivers'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a cancellation, inside a transaction. `status` must be one of
    /// the two cancelled states.
    pub async fn mark_cancelled_tx(
        conn: &mut PgConnection,
        id: Uuid,
        status: &str,
        reason: Option<&str>,
        cancelled_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE ride_requests
            SET status = $2, cancelled_at = $3, cancellation_reason = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(cancelled_at)
        .bind(reason)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Transition an accepted ride to completed, inside a transaction.
    pub async fn mark_completed_tx(
        conn: &mut PgConnection,
        id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE ride_requests
            SET status = 'completed', completed_at = $2
            WHERE id = $1 AND status = 'accepted'
            "#,
        )
        .bind(id)
        .bind(completed_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Ride history for a passenger, newest first.
    pub async fn list_for_passenger(
        &self,
        passenger_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RideRequestEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideRequestEntity>(
            r#"
            SELECT id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                   pickup_address, dropoff_address, number_of_passengers,
                   broadcast_radius_m, status, requested_at, accepted_at,
                   completed_at, cancelled_at, cancellation_reason
            FROM ride_requests
            WHERE passenger_id = $1
            ORDER BY requested_at DESC
            LIMIT $2
            "#,
        )
        .bind(passenger_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Pending rides, for the driver-side polling fallback. Distance
    /// ordering happens in the caller, which owns the geo kernel.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<RideRequestEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideRequestEntity>(
            r#"
            SELECT id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                   pickup_address, dropoff_address, number_of_passengers,
                   broadcast_radius_m, status, requested_at, accepted_at,
                   completed_at, cancelled_at, cancellation_reason
            FROM ride_requests
            WHERE status = 'pending'
            ORDER BY requested_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete terminal rides older than the retention window, in batches.
    /// Offers go with their rides via the cascade. Returns rows deleted.
    pub async fn delete_old_terminal(
        &self,
        retention_days: i64,
        batch_size: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            WITH to_delete AS (
                SELECT id FROM ride_requests
                WHERE requested_at < NOW() - make_interval(days => $1)
                  AND status IN ('completed', 'cancelled_user', 'cancelled_driver', 'no_drivers')
                LIMIT $2
            )
            DELETE FROM ride_requests
            WHERE id IN (SELECT id FROM to_delete)
            "#,
        )
        .bind(retention_days as i32)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Completed rides for a driver, newest first.
    pub async fn list_completed_for_driver(
        &self,
        driver_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RideRequestEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideRequestEntity>(
            r#"
            SELECT id, passenger_id, driver_id, pickup_latitude, pickup_longitude,
                   pickup_address, dropoff_address, number_of_passengers,
                   broadcast_radius_m, status, requested_at, accepted_at,
                   completed_at, cancelled_at, cancellation_reason
            FROM ride_requests
            WHERE driver_id = $1 AND status = 'completed'
            ORDER BY completed_at DESC
            LIMIT $2
            "#,
        )
        .bind(driver_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
