//! Closed vocabulary of events appended to a game's channel.
//!
//! Each variant maps to one outbox `name`; the variant's payload is the outbox `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::state::game::{Choice, GamePhase, PlayerReadiness, ScoreDelta};

/// Wire name of [`GameEvent::Batch`].
pub const EVENT_BATCH: &str = "batch";
/// Wire name of [`GameEvent::PlayerJoined`].
pub const EVENT_PLAYER_JOINED: &str = "player-joined";
/// Wire name of [`GameEvent::PlayerReadyChanged`].
pub const EVENT_PLAYER_READY_CHANGED: &str = "player-ready-changed";
/// Wire name of [`GameEvent::PhaseChanged`].
pub const EVENT_PHASE_CHANGED: &str = "phase-changed";
/// Wire name of [`GameEvent::RoundTimeChanged`].
pub const EVENT_ROUND_TIME_CHANGED: &str = "round-time-changed";
/// Wire name of [`GameEvent::CurrentRoundChanged`].
pub const EVENT_CURRENT_ROUND_CHANGED: &str = "current-round-changed";
/// Wire name of [`GameEvent::ChoiceSubmitted`].
pub const EVENT_CHOICE_SUBMITTED: &str = "choice-submitted";

const KNOWN_EVENTS: [&str; 7] = [
    EVENT_BATCH,
    EVENT_PLAYER_JOINED,
    EVENT_PLAYER_READY_CHANGED,
    EVENT_PHASE_CHANGED,
    EVENT_ROUND_TIME_CHANGED,
    EVENT_CURRENT_ROUND_CHANGED,
    EVENT_CHOICE_SUBMITTED,
];

/// Everything that can happen to a game, as recorded in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum GameEvent {
    /// Events that must be folded together, in order.
    Batch(Vec<GameEvent>),
    /// A player became a member.
    PlayerJoined(PlayerJoined),
    /// A member's readiness flipped.
    PlayerReadyChanged(PlayerReadyChanged),
    /// The game moved to another lifecycle phase.
    PhaseChanged(PhaseChanged),
    /// A round was scheduled.
    RoundTimeChanged(RoundTimeChanged),
    /// The open round changed.
    CurrentRoundChanged(CurrentRoundChanged),
    /// A member locked in a choice.
    ChoiceSubmitted(ChoiceSubmitted),
}

/// Payload of `player-joined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoined {
    /// Joining player.
    pub id: String,
}

/// Payload of `player-ready-changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerReadyChanged {
    /// Member whose readiness changed.
    pub id: String,
    /// Readiness after the change.
    pub state: PlayerReadiness,
}

/// Payload of `phase-changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChanged {
    /// Phase entered.
    pub phase: GamePhase,
}

/// Payload of `round-time-changed`: the window during which a round accepts choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTimeChanged {
    /// Round being scheduled.
    pub round_index: u32,
    /// When choices open.
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// When unanswered members get the empty choice.
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
}

/// `round_index` is `None` once the game has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRoundChanged {
    /// Newly opened round.
    pub round_index: Option<u32>,
}

/// Payload of `choice-submitted`, carrying the score computed at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceSubmitted {
    /// Round answered.
    pub round_index: u32,
    /// Member who answered.
    pub player_id: String,
    /// The locked-in answer.
    pub choice: Choice,
    /// Points awarded per option id.
    pub score_delta: ScoreDelta,
}

/// Failure to turn a raw `(name, payload)` pair back into a [`GameEvent`].
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The name is not part of the vocabulary.
    #[error("unknown event `{0}`")]
    Unknown(String),
    /// The payload does not match the named event.
    #[error("malformed `{name}` payload: {source}")]
    Malformed {
        /// Event name that was being decoded.
        name: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl GameEvent {
    /// Outbox name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::Batch(_) => EVENT_BATCH,
            GameEvent::PlayerJoined(_) => EVENT_PLAYER_JOINED,
            GameEvent::PlayerReadyChanged(_) => EVENT_PLAYER_READY_CHANGED,
            GameEvent::PhaseChanged(_) => EVENT_PHASE_CHANGED,
            GameEvent::RoundTimeChanged(_) => EVENT_ROUND_TIME_CHANGED,
            GameEvent::CurrentRoundChanged(_) => EVENT_CURRENT_ROUND_CHANGED,
            GameEvent::ChoiceSubmitted(_) => EVENT_CHOICE_SUBMITTED,
        }
    }

    /// Split into the `(name, payload)` pair stored in the outbox.
    pub fn into_parts(self) -> serde_json::Result<(&'static str, Value)> {
        let name = self.name();
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((name, payload))
    }

    /// Rebuild an event from its outbox `(name, payload)` pair.
    pub fn decode(name: &str, payload: Value) -> Result<Self, EventDecodeError> {
        if !KNOWN_EVENTS.contains(&name) {
            return Err(EventDecodeError::Unknown(name.to_string()));
        }
        let tagged = serde_json::json!({ "name": name, "data": payload });
        serde_json::from_value(tagged).map_err(|source| EventDecodeError::Malformed {
            name: name.to_string(),
            source,
        })
    }

    /// Wrap `events` into a single batch row, or keep them as separate rows.
    ///
    /// Both layouts are appended contiguously inside one transaction.
    pub fn batched(events: Vec<GameEvent>, batch: bool) -> Vec<GameEvent> {
        if batch && events.len() > 1 {
            vec![GameEvent::Batch(events)]
        } else {
            events
        }
    }
}
