//! Library crate for predictive-trivia-back, exposing modules for binaries and integration tests.

pub mod client;
pub mod config;
/// Persistence: store trait, backends and the shared transactional mutations.
pub mod dao;
/// Wire types for the REST API, the event log and SSE frames.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routers.
pub mod routes;
/// Business logic invoked by the routes and background tasks.
pub mod services;
/// Shared application state and the game model.
pub mod state;
