use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timings of the supervision loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// First reconnect delay.
    pub initial_delay: Duration,
    /// Cap of the doubling reconnect delay.
    pub max_delay: Duration,
    /// Interval between health checks once connected.
    pub health_poll_interval: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
            health_poll_interval: HEALTH_POLL_INTERVAL,
        }
    }
}

/// Connect to the storage backend and keep the shared state in degraded mode while it is unavailable.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    run_with_timings(state, connect, SupervisorTimings::default()).await;
}

/// [`run`] with explicit timings.
pub async fn run_with_timings<F, Fut>(state: SharedState, mut connect: F, timings: SupervisorTimings)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    let mut delay = timings.initial_delay;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_game_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = timings.initial_delay;

                loop {
                    sleep(timings.health_poll_interval).await;
                    if let Err(err) = store.health_check().await {
                        warn!(error = %err, "storage health check failed; entering degraded mode");
                        state.clear_game_store().await;
                        break;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(timings.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{config::AppConfig, dao::game_store::memory::MemoryGameStore, state::AppState};

    #[tokio::test]
    async fn retries_until_storage_connects() {
        let state = AppState::new(AppConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let connect = move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::unavailable(
                        "connect".into(),
                        std::io::Error::other("refused"),
                    ))
                } else {
                    Ok(Arc::new(MemoryGameStore::new()) as Arc<dyn GameStore>)
                }
            }
        };
        let timings = SupervisorTimings {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            health_poll_interval: Duration::from_secs(60),
        };

        let mut watcher = state.degraded_watcher();
        let task = tokio::spawn(run_with_timings(state.clone(), connect, timings));
        tokio::time::timeout(Duration::from_secs(5), watcher.wait_for(|degraded| !degraded))
            .await
            .unwrap()
            .unwrap();
        assert!(state.require_game_store().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        task.abort();
    }
}
