use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::dto::events::{EventDecodeError, GameEvent};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event` field.
    pub event: Option<String>,
    /// SSE `id` field.
    pub id: Option<String>,
    /// Serialized JSON body.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            id: None,
            data: serde_json::to_string(payload)?,
        })
    }

    /// Frame a delivery: the event name is the SSE `event`, its sequence id the SSE `id`.
    pub fn from_delivery(delivery: &EventDelivery) -> serde_json::Result<Self> {
        let mut event = Self::json(Some(delivery.event_name.clone()), delivery)?;
        event.id = Some(delivery.sequence_id.to_string());
        Ok(event)
    }
}

/// One outbox row as seen by push subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EventDelivery {
    /// Wire name of the event.
    pub event_name: String,
    /// Event body, decoded with [`EventDelivery::decode`].
    #[schema(value_type = Object)]
    pub payload: Value,
    /// Unique per outbox row; clients drop repeated ids.
    pub mutation_id: String,
    /// Dense per-channel position, starting at 1.
    pub sequence_id: u64,
    /// Deliveries of the same transaction still to come; local state is only
    /// consistent once this reaches zero.
    #[serde(default)]
    pub group_remaining: u32,
}

impl EventDelivery {
    /// Decode the payload into the closed event vocabulary.
    pub fn decode(&self) -> Result<GameEvent, EventDecodeError> {
        GameEvent::decode(&self.event_name, self.payload.clone())
    }
}
