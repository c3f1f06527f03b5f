use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dao::models::game_channel,
    dto::sse::{EventDelivery, ServerEvent},
    error::ServiceError,
    state::SharedState,
};

/// Live subscription to a game channel, plus the stored deliveries the client missed.
pub struct GameSubscription {
    /// Subscribed game.
    pub game_id: String,
    /// Deliveries published from now on.
    pub receiver: broadcast::Receiver<EventDelivery>,
    /// Stored deliveries after the client's last event id, in sequence order.
    pub backlog: Vec<EventDelivery>,
}

/// Subscribe to `game_id`, replaying everything after `last_event_id` when given.
///
/// The live receiver is registered before the backlog is read so nothing committed in
/// between is lost; overlapping deliveries are filtered by sequence id when streaming.
pub async fn subscribe_game(
    state: &SharedState,
    game_id: String,
    last_event_id: Option<u64>,
) -> Result<GameSubscription, ServiceError> {
    let store = state.require_game_store().await?;
    if store.snapshot(game_id.clone()).await?.is_none() {
        return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
    }

    let receiver = state.hubs().subscribe(&game_channel(&game_id));
    let backlog = match last_event_id {
        Some(after) => store
            .events_since(game_id.clone(), after)
            .await?
            .iter()
            .map(|record| record.delivery())
            .collect(),
        None => Vec::new(),
    };
    info!(%game_id, replayed = backlog.len(), "game SSE subscription opened");
    Ok(GameSubscription {
        game_id,
        receiver,
        backlog,
    })
}

fn to_event(delivery: &EventDelivery) -> Option<Event> {
    match ServerEvent::from_delivery(delivery) {
        Ok(payload) => {
            let mut event = Event::default().data(payload.data);
            if let Some(name) = payload.event {
                event = event.event(name);
            }
            if let Some(id) = payload.id {
                event = event.id(id);
            }
            Some(event)
        }
        Err(err) => {
            warn!(error = %err, sequence_id = delivery.sequence_id, "failed to encode delivery");
            None
        }
    }
}

/// Convert a game subscription into an SSE response, forwarding deliveries in sequence
/// order until the client disconnects.
pub fn to_sse_stream(
    subscription: GameSubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let GameSubscription {
        game_id,
        mut receiver,
        backlog,
    } = subscription;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let mut last_sent = 0u64;

        for delivery in backlog {
            last_sent = delivery.sequence_id;
            if let Some(event) = to_event(&delivery) {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(delivery) => {
                            if delivery.sequence_id <= last_sent {
                                continue;
                            }
                            last_sent = delivery.sequence_id;
                            let Some(event) = to_event(&delivery) else {
                                continue;
                            };
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // The client sees a sequence gap and resyncs.
                            debug!(%game_id, skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(%game_id, "game SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
