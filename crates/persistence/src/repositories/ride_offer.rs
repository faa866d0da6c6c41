//! Ride offer repository for database operations.
//!
//! Offers form the daisy-chain queue: ordered rows per ride, at most one in
//! flight. Every resolution goes through a conditional update on
//! `status = 'pending'` so racing resolvers (timeout, rejection, acceptance,
//! sweeper) settle each offer exactly once.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::RideOfferEntity;
use crate::metrics::QueryTimer;

const OFFER_COLUMNS: &str =
    "id, ride_id, driver_id, offer_order, status, sent_at, responded_at, created_at";

/// Repository for ride-offer database operations.
#[derive(Clone)]
pub struct RideOfferRepository {
    pool: PgPool,
}

impl RideOfferRepository {
    /// Creates a new RideOfferRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace a ride's offer queue with a fresh one, ordered 0..N-1.
    ///
    /// Delete and inserts run in one transaction: the queue is rebuilt
    /// completely or not at all.
    pub async fn replace_for_ride(
        &self,
        ride_id: Uuid,
        driver_ids: &[Uuid],
    ) -> Result<Vec<RideOfferEntity>, sqlx::Error> {
        let timer = QueryTimer::new("replace_offers_for_ride");
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM ride_offers WHERE ride_id = $1")
            .bind(ride_id)
            .execute(&mut *tx)
            .await?;

        let mut offers = Vec::with_capacity(driver_ids.len());
        for (order, driver_id) in driver_ids.iter().enumerate() {
            let offer = sqlx::query_as::<_, RideOfferEntity>(&format!(
                r#"
                INSERT INTO ride_offers (ride_id, driver_id, offer_order)
                VALUES ($1, $2, $3)
                RETURNING {OFFER_COLUMNS}
                "#
            ))
            .bind(ride_id)
            .bind(driver_id)
            .bind(order as i32)
            .fetch_one(&mut *tx)
            .await?;
            offers.push(offer);
        }

        tx.commit().await?;
        timer.record();
        Ok(offers)
    }

    /// Claim the next unsent pending offer (lowest order) by stamping its
    /// `sent_at`.
    ///
    /// The claim is a single conditional update over a locked sub-select, so
    /// two racing dispatchers (a rejection and a timeout, say) cannot both
    /// send the same offer.
    pub async fn claim_next_unsent(
        &self,
        ride_id: Uuid,
    ) -> Result<Option<RideOfferEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_next_unsent_offer");
        let result = sqlx::query_as::<_, RideOfferEntity>(&format!(
            r#"
            UPDATE ride_offers
            SET sent_at = NOW()
            WHERE id = (
                SELECT id
                FROM ride_offers
                WHERE ride_id = $1 AND status = 'pending' AND sent_at IS NULL
                ORDER BY offer_order
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Resolve an offer as expired if it is still pending. Returns the
    /// resolved row, or None when another resolver already settled it.
    pub async fn expire_if_pending(
        &self,
        offer_id: Uuid,
    ) -> Result<Option<RideOfferEntity>, sqlx::Error> {
        let timer = QueryTimer::new("expire_offer_if_pending");
        let result = sqlx::query_as::<_, RideOfferEntity>(&format!(
            r#"
            UPDATE ride_offers
            SET status = 'expired', responded_at = NOW()
            WHERE id = $1 AND status = 'pending' AND responded_at IS NULL
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Resolve a driver's offer on a ride as rejected if still pending.
    pub async fn reject_if_pending(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
    ) -> Result<Option<RideOfferEntity>, sqlx::Error> {
        let timer = QueryTimer::new("reject_offer_if_pending");
        let result = sqlx::query_as::<_, RideOfferEntity>(&format!(
            r#"
            UPDATE ride_offers
            SET status = 'rejected', responded_at = NOW()
            WHERE ride_id = $1 AND driver_id = $2 AND status = 'pending'
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(ride_id)
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Resolve an offer as accepted if still pending, inside the acceptance
    /// transaction. None means a timeout or the sweeper got there first.
    pub async fn accept_if_pending_tx(
        conn: &mut PgConnection,
        offer_id: Uuid,
    ) -> Result<Option<RideOfferEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideOfferEntity>(&format!(
            r#"
            UPDATE ride_offers
            SET status = 'accepted', responded_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(offer_id)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Retire every still-pending offer on a ride (except, optionally, one
    /// winner) as expired. Returns the retired rows so callers can cancel
    /// timers and notify the affected drivers.
    pub async fn expire_other_pending_tx(
        conn: &mut PgConnection,
        ride_id: Uuid,
        except: Option<Uuid>,
    ) -> Result<Vec<RideOfferEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideOfferEntity>(&format!(
            r#"
            UPDATE ride_offers
            SET status = 'expired', responded_at = NOW()
            WHERE ride_id = $1 AND status = 'pending' AND ($2::uuid IS NULL OR id != $2)
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(ride_id)
        .bind(except)
        .fetch_all(&mut *conn)
        .await
    }

    /// Find an offer by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<RideOfferEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideOfferEntity>(&format!(
            "SELECT {OFFER_COLUMNS} FROM ride_offers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// All offers on a ride, queue order, inside a transaction.
    pub async fn list_for_ride_tx(
        conn: &mut PgConnection,
        ride_id: Uuid,
    ) -> Result<Vec<RideOfferEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideOfferEntity>(&format!(
            "SELECT {OFFER_COLUMNS} FROM ride_offers WHERE ride_id = $1 ORDER BY offer_order"
        ))
        .bind(ride_id)
        .fetch_all(&mut *conn)
        .await
    }

    /// All offers on a ride, queue order.
    pub async fn list_for_ride(&self, ride_id: Uuid) -> Result<Vec<RideOfferEntity>, sqlx::Error> {
        sqlx::query_as::<_, RideOfferEntity>(&format!(
            "SELECT {OFFER_COLUMNS} FROM ride_offers WHERE ride_id = $1 ORDER BY offer_order"
        ))
        .bind(ride_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Number of offers on a ride still pending.
    pub async fn count_pending(&self, ride_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ride_offers WHERE ride_id = $1 AND status = 'pending'",
        )
        .bind(ride_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Whether any offer on the ride was ever dispatched to a driver.
    pub async fn any_sent(&self, ride_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM ride_offers WHERE ride_id = $1 AND sent_at IS NOT NULL)",
        )
        .bind(ride_id)
        .fetch_one(&self.pool)
        .await
    }

    /// In-flight offers whose deadline passed, for the sweeper. Uses the
    /// (status, sent_at) index.
    pub async fn list_timed_out(
        &self,
        older_than_secs: f64,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let timer = QueryTimer::new("list_timed_out_offers");
        let result = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM ride_offers
            WHERE status = 'pending'
              AND sent_at IS NOT NULL
              AND responded_at IS NULL
              AND sent_at < NOW() - make_interval(secs => $1)
            ORDER BY sent_at
            LIMIT $2
            "#,
        )
        .bind(older_than_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}
