//! Timed-out offer sweeper.
//!
//! The authoritative fallback behind the per-offer timers: because
//! `sent_at` is persisted, any in-flight offer past its deadline can be
//! expired here even if the worker holding its timer restarted. The expiry
//! CAS keeps the two paths from double-resolving an offer.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::services::matcher::OfferMatcher;
use persistence::repositories::RideOfferRepository;

use super::scheduler::{Job, JobFrequency};

/// Offers handled per sweep; anything left over is caught next tick.
const SWEEP_BATCH: i64 = 500;

/// Background job that expires overdue in-flight offers.
pub struct OfferSweeperJob {
    offers: RideOfferRepository,
    matcher: Arc<OfferMatcher>,
    timeout_secs: u64,
    interval_secs: u64,
}

impl OfferSweeperJob {
    pub fn new(
        pool: PgPool,
        matcher: Arc<OfferMatcher>,
        timeout_secs: u64,
        interval_secs: u64,
    ) -> Self {
        Self {
            offers: RideOfferRepository::new(pool),
            matcher,
            timeout_secs,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for OfferSweeperJob {
    fn name(&self) -> &'static str {
        "offer_timeout_sweeper"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let overdue = self
            .offers
            .list_timed_out(self.timeout_secs as f64, SWEEP_BATCH)
            .await
            .map_err(|e| format!("Failed to list timed-out offers: {e}"))?;

        if overdue.is_empty() {
            return Ok(());
        }

        let count = overdue.len();
        for offer_id in overdue {
            self.matcher.expire_and_advance(offer_id).await;
        }

        info!(expired = count, "Swept timed-out offers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweeper_frequency_follows_config() {
        // The job cannot run without a pool, but the schedule wiring can be
        // checked in isolation.
        assert_eq!(
            JobFrequency::Seconds(5).duration(),
            std::time::Duration::from_secs(5)
        );
        assert!(SWEEP_BATCH > 0);
    }
}
