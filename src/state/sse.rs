use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::dto::sse::EventDelivery;

/// Broadcast hubs keyed by outbox channel, created on first use.
pub struct ChannelHubs {
    hubs: DashMap<String, SseHub>,
    capacity: usize,
}

impl ChannelHubs {
    /// Build an empty registry whose hubs buffer `capacity` deliveries each.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber on `channel`, creating the hub if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<EventDelivery> {
        self.hubs
            .entry(channel.to_string())
            .or_insert_with(|| SseHub::new(self.capacity))
            .subscribe()
    }

    /// Deliver to every current subscriber of `channel`. Returns how many received it.
    pub fn publish(&self, channel: &str, delivery: EventDelivery) -> usize {
        match self.hubs.get(channel) {
            Some(hub) => hub.broadcast(delivery),
            None => 0,
        }
    }

    /// Number of channels that currently have a subscriber.
    pub fn live_channels(&self) -> usize {
        self.hubs
            .iter()
            .filter(|hub| hub.receiver_count() > 0)
            .count()
    }

    /// Drop hubs nobody listens to anymore.
    pub fn prune_idle(&self) -> usize {
        let before = self.hubs.len();
        self.hubs.retain(|_, hub| hub.receiver_count() > 0);
        before - self.hubs.len()
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<EventDelivery>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventDelivery> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: EventDelivery) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(sequence_id: u64) -> EventDelivery {
        EventDelivery {
            event_name: "player-joined".into(),
            payload: serde_json::json!({ "id": "p" }),
            mutation_id: format!("m{sequence_id}"),
            sequence_id,
            group_remaining: 0,
        }
    }

    #[tokio::test]
    async fn deliveries_stay_on_their_channel() {
        let hubs = ChannelHubs::new(8);
        let mut first = hubs.subscribe("game:a");
        let mut second = hubs.subscribe("game:b");

        assert_eq!(hubs.publish("game:a", delivery(1)), 1);
        assert_eq!(first.recv().await.unwrap().sequence_id, 1);
        assert!(second.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_a_noop() {
        let hubs = ChannelHubs::new(8);
        assert_eq!(hubs.publish("game:none", delivery(1)), 0);
    }

    #[test]
    fn idle_hubs_are_pruned() {
        let hubs = ChannelHubs::new(8);
        let kept = hubs.subscribe("game:kept");
        drop(hubs.subscribe("game:gone"));

        assert_eq!(hubs.live_channels(), 1);
        assert_eq!(hubs.prune_idle(), 1);
        assert_eq!(hubs.publish("game:kept", delivery(1)), 1);
        drop(kept);
    }
}
