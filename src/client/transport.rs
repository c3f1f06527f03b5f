use async_stream::stream;
use futures::{
    future::BoxFuture,
    stream::BoxStream,
};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    dao::models::game_channel,
    dto::sse::EventDelivery,
    error::ServiceError,
    services::game_service,
    state::{
        SharedState,
        game::{Choice, GameSnapshot},
    },
};

/// Live deliveries of one game channel.
pub type DeliveryStream = BoxStream<'static, Result<EventDelivery, TransportError>>;

/// Failures of the path between a client session and the backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend could not serve the request; worth retrying.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Unknown game, player or round.
    #[error("not found: {0}")]
    NotFound(String),
    /// The backend refused a mutation because of the current game state.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The push stream ended.
    #[error("subscription closed")]
    Closed,
    /// The subscriber fell behind and deliveries were dropped.
    #[error("subscription lagged by {0} deliveries")]
    Lagged(u64),
    /// A response or frame did not parse.
    #[error("undecodable response: {0}")]
    Decode(String),
    /// The HTTP request itself failed.
    #[cfg(feature = "http-client")]
    #[error("request to `{path}` failed")]
    Http {
        /// Requested path.
        path: String,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },
    /// The backend answered with a status the client does not handle.
    #[cfg(feature = "http-client")]
    #[error("unexpected status {status} for `{path}`")]
    Status {
        /// Requested path.
        path: String,
        /// HTTP status code.
        status: u16,
    },
}

impl From<ServiceError> for TransportError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(message) => TransportError::NotFound(message),
            ServiceError::InvalidState(message) | ServiceError::InvalidInput(message) => {
                TransportError::Rejected(message)
            }
            other => TransportError::Unavailable(other.to_string()),
        }
    }
}

/// Access a client session needs: full snapshots, the push stream, and the
/// automatic timeout submission.
pub trait SyncTransport: Send + Sync {
    /// Current state of the game with its log position.
    fn fetch_snapshot(&self, game_id: &str) -> BoxFuture<'static, Result<GameSnapshot, TransportError>>;
    /// Live deliveries from now on.
    fn subscribe(&self, game_id: &str) -> BoxFuture<'static, Result<DeliveryStream, TransportError>>;
    /// Submit a choice on behalf of `player_id`.
    fn submit_choice(
        &self,
        game_id: &str,
        round_index: u32,
        player_id: &str,
        choice: Choice,
    ) -> BoxFuture<'static, Result<(), TransportError>>;
}

/// Transport talking directly to the shared application state of this process.
#[derive(Clone)]
pub struct InProcessTransport {
    state: SharedState,
}

impl InProcessTransport {
    /// Transport over `state`.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl SyncTransport for InProcessTransport {
    fn fetch_snapshot(&self, game_id: &str) -> BoxFuture<'static, Result<GameSnapshot, TransportError>> {
        let state = self.state.clone();
        let game_id = game_id.to_string();
        Box::pin(async move { Ok(game_service::game_state(&state, game_id).await?) })
    }

    fn subscribe(&self, game_id: &str) -> BoxFuture<'static, Result<DeliveryStream, TransportError>> {
        let mut receiver = self.state.hubs().subscribe(&game_channel(game_id));
        Box::pin(async move {
            let deliveries: DeliveryStream = Box::pin(stream! {
                loop {
                    match receiver.recv().await {
                        Ok(delivery) => yield Ok(delivery),
                        Err(RecvError::Lagged(skipped)) => yield Err(TransportError::Lagged(skipped)),
                        Err(RecvError::Closed) => {
                            yield Err(TransportError::Closed);
                            break;
                        }
                    }
                }
            });
            Ok(deliveries)
        })
    }

    fn submit_choice(
        &self,
        game_id: &str,
        round_index: u32,
        player_id: &str,
        choice: Choice,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let state = self.state.clone();
        let game_id = game_id.to_string();
        let player_id = player_id.to_string();
        Box::pin(async move {
            game_service::submit_choice(&state, game_id, round_index, player_id, choice).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::{GameStore, memory::MemoryGameStore},
        services::outbox_dispatcher::OutboxDispatcher,
        state::AppState,
    };

    #[tokio::test]
    async fn in_process_subscription_sees_dispatched_rows() {
        let state = AppState::new(AppConfig::default());
        let store = Arc::new(MemoryGameStore::new());
        state.install_game_store(store.clone()).await;
        let game = store.create_game(vec!["a".into()]).await.unwrap();

        let transport = InProcessTransport::new(state.clone());
        let mut deliveries = transport.subscribe(&game.id).await.unwrap();
        let player = store.create_player("ada".into()).await.unwrap();
        store.join_game(game.id.clone(), player.id).await.unwrap();
        OutboxDispatcher::new(state.clone())
            .dispatch_once()
            .await
            .unwrap();

        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.sequence_id, 1);
        let snapshot = transport.fetch_snapshot(&game.id).await.unwrap();
        assert_eq!(snapshot.sequence_id, 1);
    }

    #[tokio::test]
    async fn missing_game_maps_to_not_found() {
        let state = AppState::new(AppConfig::default());
        state
            .install_game_store(Arc::new(MemoryGameStore::new()))
            .await;
        let transport = InProcessTransport::new(state);
        assert!(matches!(
            transport.fetch_snapshot("missing").await,
            Err(TransportError::NotFound(_))
        ));
    }
}
