use axum::Router;

use crate::state::SharedState;

/// Swagger UI and the OpenAPI document.
pub mod docs;
pub mod extract;
/// Game lifecycle endpoints.
pub mod game;
/// Liveness endpoint.
pub mod health;
/// Player endpoints.
pub mod player;
/// Per-game event streams.
pub mod sse;

/// Compose the REST, SSE and documentation routes over the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(player::router())
        .merge(game::router())
        .merge(sse::router())
        .merge(docs::router())
        .with_state(state)
}
