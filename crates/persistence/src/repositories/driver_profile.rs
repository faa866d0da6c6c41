//! Driver profile repository for database operations.

use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::DriverProfileEntity;
use crate::metrics::QueryTimer;

/// Display identity for a driver, used in broadcast payloads.
#[derive(Debug, Clone, FromRow)]
pub struct DriverIdentity {
    pub username: String,
    pub vehicle_number: String,
}

/// Repository for driver-profile database operations.
#[derive(Clone)]
pub struct DriverProfileRepository {
    pool: PgPool,
}

impl DriverProfileRepository {
    /// Creates a new DriverProfileRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a profile for a driver, or update the vehicle number of an
    /// existing one.
    pub async fn upsert(
        &self,
        user_id: Uuid,
        vehicle_number: &str,
    ) -> Result<DriverProfileEntity, sqlx::Error> {
        let timer = QueryTimer::new("upsert_driver_profile");
        let result = sqlx::query_as::<_, DriverProfileEntity>(
            r#"
            INSERT INTO driver_profiles (user_id, vehicle_number)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET vehicle_number = EXCLUDED.vehicle_number, updated_at = NOW()
            RETURNING user_id, vehicle_number, status,
                      current_latitude, current_longitude, last_location_update
            "#,
        )
        .bind(user_id)
        .bind(vehicle_number)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a profile by driver user id.
    pub async fn find_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<DriverProfileEntity>, sqlx::Error> {
        sqlx::query_as::<_, DriverProfileEntity>(
            r#"
            SELECT user_id, vehicle_number, status,
                   current_latitude, current_longitude, last_location_update
            FROM driver_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find a profile and take a row lock on it, inside a transaction.
    pub async fn find_by_user_id_for_update(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<DriverProfileEntity>, sqlx::Error> {
        sqlx::query_as::<_, DriverProfileEntity>(
            r#"
            SELECT user_id, vehicle_number, status,
                   current_latitude, current_longitude, last_location_update
            FROM driver_profiles
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Fetch the driver's display identity (username + vehicle number).
    pub async fn find_identity(
        &self,
        user_id: Uuid,
    ) -> Result<Option<DriverIdentity>, sqlx::Error> {
        sqlx::query_as::<_, DriverIdentity>(
            r#"
            SELECT u.username, p.vehicle_number
            FROM driver_profiles p
            JOIN users u ON u.id = p.user_id
            WHERE p.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Update only the status field.
    pub async fn update_status(&self, user_id: Uuid, status: &str) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("update_driver_status");
        let result = sqlx::query(
            r#"
            UPDATE driver_profiles
            SET status = $2, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(status)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// Update only the status field, inside a transaction.
    pub async fn update_status_tx(
        conn: &mut PgConnection,
        user_id: Uuid,
        status: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE driver_profiles
            SET status = $2, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(status)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Update only the location fields and their freshness timestamp.
    pub async fn update_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("update_driver_location");
        let result = sqlx::query(
            r#"
            UPDATE driver_profiles
            SET current_latitude = $2,
                current_longitude = $3,
                last_location_update = NOW(),
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(latitude)
        .bind(longitude)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }
}
