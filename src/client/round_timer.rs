use std::{future::Future, time::Duration};

use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::sleep};

/// Fire-once deadline per round index.
///
/// Arming a new round cancels the pending timer of the previous one; arming an
/// index that was already armed does nothing, so each round fires at most once.
#[derive(Debug, Default)]
pub struct RoundTimer {
    last_index: Option<u32>,
    pending: Option<JoinHandle<()>>,
}

impl RoundTimer {
    /// Timer with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_expiry` once `deadline` passes. Returns `false` if `round_index` was armed before.
    pub fn arm<F, Fut>(&mut self, round_index: u32, deadline: OffsetDateTime, on_expiry: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.last_index.is_some_and(|last| last >= round_index) {
            return false;
        }
        self.cancel();
        self.last_index = Some(round_index);

        let remaining = Duration::try_from(deadline - OffsetDateTime::now_utc()).unwrap_or_default();
        self.pending = Some(tokio::spawn(async move {
            sleep(remaining).await;
            on_expiry().await;
        }));
        true
    }

    /// Drop the pending timer, if any. The round stays marked as armed.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Index of the most recently armed round.
    pub fn armed_round(&self) -> Option<u32> {
        self.last_index
    }

    /// Whether a timer is armed and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    type Expiry = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

    fn counter() -> (Arc<AtomicU32>, impl Fn() -> Expiry + Clone + Send + 'static) {
        let fired = Arc::new(AtomicU32::new(0));
        let handle = fired.clone();
        let callback = move || {
            let handle = handle.clone();
            Box::pin(async move {
                handle.fetch_add(1, Ordering::SeqCst);
            }) as Expiry
        };
        (fired, callback)
    }

    #[tokio::test]
    async fn fires_once_per_round() {
        let (fired, callback) = counter();
        let mut timer = RoundTimer::new();
        let deadline = OffsetDateTime::now_utc() + time::Duration::milliseconds(20);

        assert!(timer.arm(0, deadline, callback.clone()));
        assert!(!timer.arm(0, deadline, callback.clone()));
        sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.arm(0, deadline, callback.clone()));
    }

    #[tokio::test]
    async fn next_round_cancels_previous() {
        let (fired, callback) = counter();
        let mut timer = RoundTimer::new();
        let soon = OffsetDateTime::now_utc() + time::Duration::milliseconds(30);
        let later = OffsetDateTime::now_utc() + time::Duration::hours(1);

        timer.arm(0, soon, callback.clone());
        timer.arm(1, later, callback.clone());
        assert_eq!(timer.armed_round(), Some(1));
        sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timer.is_pending());

        drop(timer);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn past_deadline_fires_immediately() {
        let (fired, callback) = counter();
        let mut timer = RoundTimer::new();
        timer.arm(3, OffsetDateTime::now_utc() - time::Duration::seconds(1), callback.clone());
        for _ in 0..50 {
            if fired.load(Ordering::SeqCst) == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
