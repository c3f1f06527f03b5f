//! Round progression: `joinable -> in_play(0) -> ... -> in_play(N-1) -> ended`.
//!
//! The decision is pure; stores apply the returned [`Advancement`] inside the
//! transaction that observed every member ready.

use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    dto::events::{
        CurrentRoundChanged, GameEvent, PhaseChanged, PlayerReadyChanged, RoundTimeChanged,
    },
    state::game::{GamePhase, PlayerReadiness},
};

/// Schedule applied when a round is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    /// Delay between the advancement and the round start.
    pub lead_in: Duration,
    /// How long a round accepts choices once started.
    pub round_duration: Duration,
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self {
            lead_in: Duration::from_millis(1_000),
            round_duration: Duration::from_millis(10_000),
        }
    }
}

/// Everything a ready transaction needs to decide and record an advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progression {
    /// Schedule of activated rounds.
    pub timing: RoundTiming,
    /// Append each event group as one `batch` row instead of one row per event.
    pub batch_events: bool,
}

impl Default for Progression {
    fn default() -> Self {
        Self {
            timing: RoundTiming::default(),
            batch_events: true,
        }
    }
}

/// Round being started by an advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundActivation {
    /// Round being activated.
    pub index: u32,
    /// Advancement time plus the lead-in.
    pub start_time: OffsetDateTime,
    /// Start time plus the round duration.
    pub end_time: OffsetDateTime,
}

/// New game header values plus the ordered events describing the change.
#[derive(Debug, Clone, PartialEq)]
pub struct Advancement {
    /// Phase after the advancement.
    pub phase: GamePhase,
    /// Open round after the advancement.
    pub current_round_index: Option<u32>,
    /// Schedule of the round being opened, if any.
    pub activation: Option<RoundActivation>,
    /// Events to append, in fold order.
    pub events: Vec<GameEvent>,
}

/// Error returned when the game cannot advance from its current position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from:?}: {reason}")]
pub struct InvalidTransition {
    /// Phase the game was in when the advancement was requested.
    pub from: GamePhase,
    /// Why the move is not allowed.
    pub reason: &'static str,
}

/// Decide where a game goes once every member is ready.
pub fn plan_advance(
    phase: GamePhase,
    current_round_index: Option<u32>,
    round_count: u32,
    now: OffsetDateTime,
    timing: RoundTiming,
) -> Result<Advancement, InvalidTransition> {
    let next = match (phase, current_round_index) {
        (GamePhase::Joinable, _) => 0,
        (GamePhase::InPlay, Some(index)) => index + 1,
        (GamePhase::InPlay, None) => {
            return Err(InvalidTransition {
                from: phase,
                reason: "game is in play without a current round",
            });
        }
        (GamePhase::Ended, _) => {
            return Err(InvalidTransition {
                from: phase,
                reason: "game has already ended",
            });
        }
    };

    if next >= round_count {
        if phase == GamePhase::Joinable {
            return Err(InvalidTransition {
                from: phase,
                reason: "game has no rounds",
            });
        }
        return Ok(Advancement {
            phase: GamePhase::Ended,
            current_round_index: None,
            activation: None,
            events: vec![
                GameEvent::CurrentRoundChanged(CurrentRoundChanged { round_index: None }),
                GameEvent::PhaseChanged(PhaseChanged {
                    phase: GamePhase::Ended,
                }),
            ],
        });
    }

    let activation = activate(next, now, timing);
    Ok(Advancement {
        phase: GamePhase::InPlay,
        current_round_index: Some(next),
        activation: Some(activation),
        events: vec![
            GameEvent::RoundTimeChanged(RoundTimeChanged {
                round_index: next,
                start_time: activation.start_time,
                end_time: activation.end_time,
            }),
            GameEvent::CurrentRoundChanged(CurrentRoundChanged {
                round_index: Some(next),
            }),
            GameEvent::PhaseChanged(PhaseChanged {
                phase: GamePhase::InPlay,
            }),
        ],
    })
}

/// Events resetting every member back to `not_ready`, in join order.
pub fn readiness_reset<'a>(player_ids: impl IntoIterator<Item = &'a str>) -> Vec<GameEvent> {
    player_ids
        .into_iter()
        .map(|id| {
            GameEvent::PlayerReadyChanged(PlayerReadyChanged {
                id: id.to_string(),
                state: PlayerReadiness::NotReady,
            })
        })
        .collect()
}

fn activate(index: u32, now: OffsetDateTime, timing: RoundTiming) -> RoundActivation {
    let start_time = now.saturating_add(to_time(timing.lead_in));
    let end_time = start_time.saturating_add(to_time(timing.round_duration));
    RoundActivation {
        index,
        start_time,
        end_time,
    }
}

fn to_time(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
