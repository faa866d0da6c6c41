//! Presence TTL sweep.

use std::sync::Arc;

use metrics::gauge;
use tracing::info;

use crate::services::presence::PresenceIndex;

use super::scheduler::{Job, JobFrequency};

/// Background job that evicts stale presence and subscription entries.
pub struct PresenceSweepJob {
    presence: Arc<PresenceIndex>,
}

impl PresenceSweepJob {
    pub fn new(presence: Arc<PresenceIndex>) -> Self {
        Self { presence }
    }
}

#[async_trait::async_trait]
impl Job for PresenceSweepJob {
    fn name(&self) -> &'static str {
        "presence_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(30)
    }

    async fn execute(&self) -> Result<(), String> {
        let (drivers, subscriptions) = self.presence.evict_expired();

        gauge!("presence_drivers").set(self.presence.driver_count() as f64);
        gauge!("presence_subscriptions").set(self.presence.subscription_count() as f64);

        if drivers > 0 || subscriptions > 0 {
            info!(drivers, subscriptions, "Evicted stale presence entries");
        }
        Ok(())
    }
}
