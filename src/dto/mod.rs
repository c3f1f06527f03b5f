pub mod events;
/// Game endpoint requests and responses.
pub mod game;
/// Health check response.
pub mod health;
/// Player endpoint requests and responses.
pub mod player;
/// SSE frames and push deliveries.
pub mod sse;
pub mod validation;
