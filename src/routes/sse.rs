use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;

use crate::{error::AppError, services::sse_service, state::SharedState};

const LAST_EVENT_ID_HEADER: &str = "last-event-id";

#[utoipa::path(
    get,
    path = "/games/{id}/events",
    tag = "sse",
    params(
        ("id" = String, Path, description = "Game identifier"),
        ("Last-Event-ID" = Option<u64>, Header, description = "Resume after this sequence id")
    ),
    responses(
        (status = 200, description = "Game event deliveries", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown game")
    )
)]
/// Stream a game's committed events in sequence order.
pub async fn game_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let last_event_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let subscription = sse_service::subscribe_game(&state, id, last_event_id).await?;
    Ok(sse_service::to_sse_stream(subscription))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/games/{id}/events", get(game_events))
}
