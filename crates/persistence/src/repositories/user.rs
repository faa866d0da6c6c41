//! User repository for database operations.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::UserEntity;
use crate::metrics::QueryTimer;

/// Input data for inserting a user.
///
/// Registration itself is an external concern; this exists for bootstrap
/// tooling and the integration test fixtures.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub username: String,
    pub role: String,
    pub phone_number: String,
}

/// Repository for user-related database operations.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Creates a new UserRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a user record.
    pub async fn insert(&self, input: UserInput) -> Result<UserEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_user");
        let result = sqlx::query_as::<_, UserEntity>(
            r#"
            INSERT INTO users (username, role, phone_number)
            VALUES ($1, $2, $3)
            RETURNING id, username, role, phone_number, completed_rides, created_at
            "#,
        )
        .bind(&input.username)
        .bind(&input.role)
        .bind(&input.phone_number)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a user by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserEntity>, sqlx::Error> {
        sqlx::query_as::<_, UserEntity>(
            r#"
            SELECT id, username, role, phone_number, completed_rides, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Increment the completed-rides counter for both ride participants.
    ///
    /// Runs inside the ride-completion transaction so the counters move
    /// exactly once per completed ride.
    pub async fn increment_completed_rides_tx(
        conn: &mut PgConnection,
        passenger_id: Uuid,
        driver_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET completed_rides = completed_rides + 1
            WHERE id = $1 OR id = $2
            "#,
        )
        .bind(passenger_id)
        .bind(driver_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}
