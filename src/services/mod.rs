/// Round content lookup.
pub mod content;
/// OpenAPI documentation generation.
pub mod documentation;
/// Game lifecycle operations: create, join, ready and submit.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Publishes committed outbox rows to live subscribers.
pub mod outbox_dispatcher;
/// Player registration.
pub mod player_service;
pub mod scoring;
/// Server-Sent Events subscription and replay.
pub mod sse_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
