//! Deterministic folding of game events into a [`GameState`].

use thiserror::Error;

use crate::{
    dto::{
        events::{
            ChoiceSubmitted, CurrentRoundChanged, EventDecodeError, GameEvent, PhaseChanged,
            PlayerJoined, PlayerReadyChanged, RoundTimeChanged,
        },
        sse::EventDelivery,
    },
    state::game::{GameState, PlayerReadiness, PlayerSnapshot, RoundChoice, RoundState},
};

/// Why an event could not be folded into the local state.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The delivery is not a known event.
    #[error(transparent)]
    Decode(#[from] EventDecodeError),
    /// The event names a player the state does not have.
    #[error("event references unknown player `{0}`")]
    UnknownPlayer(String),
    /// The event names a round the state does not have.
    #[error("event references unknown round {0}")]
    UnknownRound(u32),
}

/// Fold `event` into a copy of `state`.
///
/// The input is left untouched when the event cannot be applied.
pub fn merge(state: &GameState, event: &GameEvent) -> Result<GameState, MergeError> {
    let mut next = state.clone();
    apply(&mut next, event)?;
    Ok(next)
}

/// Decode a push delivery and fold it into a copy of `state`.
pub fn merge_delivery(state: &GameState, delivery: &EventDelivery) -> Result<GameState, MergeError> {
    let event = delivery.decode()?;
    merge(state, &event)
}

/// Fold `events` in order, starting from `initial`.
pub fn replay<'a, I>(initial: &GameState, events: I) -> Result<GameState, MergeError>
where
    I: IntoIterator<Item = &'a GameEvent>,
{
    let mut state = initial.clone();
    for event in events {
        apply(&mut state, event)?;
    }
    Ok(state)
}

/// Apply `event` in place. A failure may leave `state` partially updated.
pub fn apply(state: &mut GameState, event: &GameEvent) -> Result<(), MergeError> {
    match event {
        GameEvent::Batch(events) => {
            for inner in events {
                apply(state, inner)?;
            }
        }
        GameEvent::PlayerJoined(PlayerJoined { id }) => {
            state.players.push(PlayerSnapshot {
                id: id.clone(),
                state: PlayerReadiness::NotReady,
            });
        }
        GameEvent::PlayerReadyChanged(PlayerReadyChanged { id, state: readiness }) => {
            let player = state
                .players
                .iter_mut()
                .find(|player| player.id == *id)
                .ok_or_else(|| MergeError::UnknownPlayer(id.clone()))?;
            player.state = *readiness;
        }
        GameEvent::PhaseChanged(PhaseChanged { phase }) => state.phase = *phase,
        GameEvent::RoundTimeChanged(RoundTimeChanged {
            round_index,
            start_time,
            end_time,
        }) => {
            let round = round_mut(state, *round_index)?;
            round.start_time = Some(*start_time);
            round.end_time = Some(*end_time);
        }
        GameEvent::CurrentRoundChanged(CurrentRoundChanged { round_index }) => {
            if let Some(index) = round_index {
                round_mut(state, *index)?;
            }
            state.current_round_index = *round_index;
        }
        GameEvent::ChoiceSubmitted(ChoiceSubmitted {
            round_index,
            player_id,
            choice,
            score_delta,
        }) => {
            if state.player(player_id).is_none() {
                return Err(MergeError::UnknownPlayer(player_id.clone()));
            }
            round_mut(state, *round_index)?.choices.push(RoundChoice {
                player_id: player_id.clone(),
                round_index: *round_index,
                choice: choice.clone(),
                score_delta: score_delta.clone(),
            });
        }
    }
    Ok(())
}

fn round_mut(state: &mut GameState, index: u32) -> Result<&mut RoundState, MergeError> {
    state
        .rounds
        .iter_mut()
        .find(|round| round.index == index)
        .ok_or(MergeError::UnknownRound(index))
}
