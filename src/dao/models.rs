use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    dto::sse::EventDelivery,
    state::game::{GamePhase, PlayerReadiness, RoundChoice, RoundState},
};

/// Registered player with a mutable display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntity {
    /// Opaque identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Game header row. Rounds, members and choices live in their own tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRow {
    /// Opaque identifier.
    pub id: String,
    /// Lifecycle phase.
    pub phase: GamePhase,
    /// Open round while in play.
    pub current_round_index: Option<u32>,
    /// Creation time, truncated to milliseconds.
    pub created_at: OffsetDateTime,
}

impl GameRow {
    /// Fresh lobby for a newly created game.
    pub fn joinable(id: String, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            phase: GamePhase::Joinable,
            current_round_index: None,
            created_at,
        }
    }
}

/// Membership of a player in a game, listed in join order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRow {
    /// Member.
    pub player_id: String,
    /// Current readiness.
    pub state: PlayerReadiness,
}

/// Event waiting to be appended; the store assigns `id` and `sequence_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    /// Fresh id used by subscribers to drop repeated deliveries.
    pub mutation_id: String,
    /// Wire name of the event.
    pub name: String,
    /// Event body as sent to subscribers.
    pub payload: Value,
    /// Rows of the same transaction appended after this one.
    pub group_remaining: u32,
}

/// Outbox row together with its dispatcher claim fields.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// Store-wide publication order.
    pub id: i64,
    /// Channel the row belongs to, see [`game_channel`].
    pub channel: String,
    /// Dense position within `channel`, starting at 1.
    pub sequence_id: u64,
    /// Unique per row; lets subscribers drop repeated deliveries.
    pub mutation_id: String,
    /// Wire name of the event.
    pub name: String,
    /// Event body.
    pub payload: Value,
    /// Rows of the same transaction that follow this one on the channel.
    pub group_remaining: u32,
    /// Dispatcher node holding the lease, if any.
    pub locked_by: Option<String>,
    /// End of the current lease.
    pub lock_expiry: Option<OffsetDateTime>,
    /// Set once the row has been published.
    pub processed: bool,
}

impl OutboxRecord {
    /// Shape delivered to push subscribers.
    pub fn delivery(&self) -> EventDelivery {
        EventDelivery {
            event_name: self.name.clone(),
            payload: self.payload.clone(),
            mutation_id: self.mutation_id.clone(),
            sequence_id: self.sequence_id,
            group_remaining: self.group_remaining,
        }
    }

    /// Whether a dispatcher may claim this row at `now`.
    pub fn claimable(&self, now: OffsetDateTime) -> bool {
        !self.processed
            && match (&self.locked_by, self.lock_expiry) {
                (None, _) => true,
                (Some(_), Some(expiry)) => expiry <= now,
                (Some(_), None) => true,
            }
    }
}

/// Channel every event of `game_id` is appended to.
pub fn game_channel(game_id: &str) -> String {
    format!("game:{game_id}")
}

/// Build an unstarted round for `event_slug`.
pub fn pending_round(index: u32, event_slug: String) -> RoundState {
    RoundState {
        index,
        event_slug,
        start_time: None,
        end_time: None,
        choices: Vec::<RoundChoice>::new(),
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::state::game::now_millis;

    fn record() -> OutboxRecord {
        OutboxRecord {
            id: 1,
            channel: game_channel("g1"),
            sequence_id: 1,
            mutation_id: "m1".into(),
            name: "player-joined".into(),
            payload: serde_json::json!({ "id": "p1" }),
            group_remaining: 0,
            locked_by: None,
            lock_expiry: None,
            processed: false,
        }
    }

    #[test]
    fn expired_leases_are_claimable_again() {
        let now = now_millis();
        let mut row = record();
        assert!(row.claimable(now));

        row.locked_by = Some("node-a".into());
        row.lock_expiry = Some(now + Duration::seconds(30));
        assert!(!row.claimable(now));
        assert!(row.claimable(now + Duration::seconds(30)));

        row.processed = true;
        assert!(!row.claimable(now + Duration::hours(1)));
    }

    #[test]
    fn channel_is_prefixed_with_game() {
        assert_eq!(game_channel("abc"), "game:abc");
        assert_eq!(record().delivery().sequence_id, 1);
    }
}
