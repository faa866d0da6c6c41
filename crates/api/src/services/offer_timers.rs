//! Per-offer expiry timers.
//!
//! One abortable task per dispatched offer is the fast path toward the
//! offer deadline; the periodic sweeper job is the authoritative fallback
//! for timers lost to a restart. Expiry callbacks are idempotent (the offer
//! status CAS settles each offer exactly once), so a timer firing after the
//! sweeper already handled its offer is harmless.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;
use uuid::Uuid;

/// Registry of scheduled offer expiries.
#[derive(Default)]
pub struct OfferTimers {
    tasks: Mutex<HashMap<Uuid, AbortHandle>>,
}

impl OfferTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<Uuid, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedule `on_expire` to run after `delay`. Replaces any timer
    /// already scheduled for the offer.
    pub fn schedule<F, Fut>(&self, offer_id: Uuid, delay: Duration, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_expire().await;
        });

        if let Some(previous) = self.tasks().insert(offer_id, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Abort and forget the timer for an offer. True when one existed.
    pub fn cancel(&self, offer_id: Uuid) -> bool {
        match self.tasks().remove(&offer_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the timer without aborting it. Used from inside the firing
    /// timer task itself, which must not abort its own execution.
    pub fn forget(&self, offer_id: Uuid) -> bool {
        self.tasks().remove(&offer_id).is_some()
    }

    /// Cancel a batch of timers (offer retirement on accept or cancel).
    pub fn cancel_all<I>(&self, offer_ids: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        let mut tasks = self.tasks();
        for offer_id in offer_ids {
            if let Some(handle) = tasks.remove(&offer_id) {
                handle.abort();
            }
        }
    }

    /// Number of timers currently registered (tests and gauges).
    pub fn pending_count(&self) -> usize {
        self.tasks().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_timer_fires_after_delay() {
        let timers = OfferTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);

        timers.schedule(Uuid::new_v4(), Duration::from_millis(20), move || async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let timers = OfferTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let offer_id = Uuid::new_v4();

        timers.schedule(offer_id, Duration::from_millis(30), move || async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.cancel(offer_id));
        assert_eq!(timers.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_previous_timer() {
        let timers = OfferTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let offer_id = Uuid::new_v4();

        for _ in 0..2 {
            let flag = Arc::clone(&fired);
            timers.schedule(offer_id, Duration::from_millis(20), move || async move {
                flag.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        // The first schedule was aborted by the second.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let timers = OfferTimers::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            timers.schedule(*id, Duration::from_secs(60), || async {});
        }
        assert_eq!(timers.pending_count(), 3);

        timers.cancel_all(ids);
        assert_eq!(timers.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_false() {
        let timers = OfferTimers::new();
        assert!(!timers.cancel(Uuid::new_v4()));
        assert!(!timers.forget(Uuid::new_v4()));
    }
}
