use serde::Serialize;
use utoipa::ToSchema;

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" when a store is installed and answering, "degraded" otherwise.
    pub status: String,
    /// Game channels with at least one live subscriber.
    pub live_channels: usize,
}

impl HealthResponse {
    /// Store installed and answering.
    pub fn ok(live_channels: usize) -> Self {
        Self {
            status: "ok".to_string(),
            live_channels,
        }
    }

    /// Running without a usable store.
    pub fn degraded(live_channels: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            live_channels,
        }
    }
}
