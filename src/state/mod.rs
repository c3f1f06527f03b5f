/// Game model shared by the server and clients.
pub mod game;
mod sse;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{Notify, RwLock, watch};

use crate::{
    config::AppConfig,
    dao::game_store::GameStore,
    error::ServiceError,
    services::{
        content::{ContentSource, StaticContentSource},
        scoring::{DefaultScorer, Scorer},
    },
};

pub use self::sse::{ChannelHubs, SseHub};

/// Handle to the application state cloned into every handler and task.
pub type SharedState = Arc<AppState>;

/// Central application state: the storage handle, broadcast hubs and game collaborators.
pub struct AppState {
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    hubs: ChannelHubs,
    config: AppConfig,
    degraded: watch::Sender<bool>,
    outbox_pending: Notify,
    scorer: Arc<dyn Scorer>,
    content: Arc<dyn ContentSource>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let scorer = Arc::new(DefaultScorer::new(config.scoring.clone()));
        let content = Arc::new(StaticContentSource::new(config.catalog.clone()));
        Self::with_collaborators(config, scorer, content)
    }

    /// Same as [`AppState::new`] with explicit scoring and content implementations.
    pub fn with_collaborators(
        config: AppConfig,
        scorer: Arc<dyn Scorer>,
        content: Arc<dyn ContentSource>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            game_store: RwLock::new(None),
            hubs: ChannelHubs::new(config.hub_capacity),
            config,
            degraded: degraded_tx,
            outbox_pending: Notify::new(),
            scorer,
            content,
        })
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current game store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn install_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
        self.notify_outbox();
    }

    /// Remove the current game store and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Per-game broadcast hubs fed by the outbox dispatcher.
    pub fn hubs(&self) -> &ChannelHubs {
        &self.hubs
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Wake the outbox dispatcher after a commit appended events.
    pub fn notify_outbox(&self) {
        self.outbox_pending.notify_one();
    }

    /// Wait until a commit appended events.
    pub async fn outbox_notified(&self) {
        self.outbox_pending.notified().await;
    }

    /// Scoring rule applied to submitted choices.
    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }

    /// Source of round options.
    pub fn content(&self) -> &dyn ContentSource {
        self.content.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::game_store::memory::MemoryGameStore;

    #[tokio::test]
    async fn store_slot_drives_degraded_flag() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());
        assert!(matches!(
            state.require_game_store().await,
            Err(ServiceError::Degraded)
        ));

        state
            .install_game_store(Arc::new(MemoryGameStore::new()))
            .await;
        watcher.changed().await.unwrap();
        assert!(!*watcher.borrow());
        assert!(state.require_game_store().await.is_ok());

        state.clear_game_store().await;
        assert!(state.is_degraded());
    }
}
