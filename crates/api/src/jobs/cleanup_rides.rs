//! Old ride cleanup background job.

use sqlx::PgPool;
use tracing::info;

use persistence::repositories::RideRequestRepository;

use super::scheduler::{Job, JobFrequency};

/// Background job that deletes settled rides past the retention window.
/// Their offer rows are removed by the cascade.
pub struct CleanupRidesJob {
    rides: RideRequestRepository,
    retention_days: u32,
    batch_size: i64,
}

impl CleanupRidesJob {
    pub fn new(pool: PgPool, retention_days: u32) -> Self {
        Self {
            rides: RideRequestRepository::new(pool),
            retention_days,
            batch_size: 10_000,
        }
    }
}

#[async_trait::async_trait]
impl Job for CleanupRidesJob {
    fn name(&self) -> &'static str {
        "cleanup_rides"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Hourly
    }

    async fn execute(&self) -> Result<(), String> {
        let mut total_deleted: u64 = 0;

        loop {
            let deleted = self
                .rides
                .delete_old_terminal(i64::from(self.retention_days), self.batch_size)
                .await
                .map_err(|e| format!("Failed to delete old rides: {e}"))?;
            total_deleted += deleted;

            if deleted < self.batch_size as u64 {
                break;
            }
            tokio::task::yield_now().await;
        }

        if total_deleted > 0 {
            info!(
                deleted = total_deleted,
                retention_days = self.retention_days,
                "Cleaned up old rides"
            );
        }
        Ok(())
    }
}
