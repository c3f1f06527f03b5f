//! Mutations shared by every backend.
//!
//! Each function runs inside one open transaction: it checks preconditions, writes,
//! then appends the events describing the write to the game's outbox channel. The
//! caller commits only when the function returns `Ok`, so a failure anywhere leaves
//! neither the write nor its events behind.

use std::future::Future;

use time::OffsetDateTime;

use crate::{
    dao::{
        models::{GameRow, MemberRow, NewOutboxEvent, PlayerEntity, game_channel, pending_round},
        storage::{StoreError, StoreResult},
    },
    dto::events::{ChoiceSubmitted, GameEvent, PlayerJoined, PlayerReadyChanged},
    state::{
        game::{GamePhase, GameState, PlayerReadiness, RoundChoice, new_id},
        state_machine::{Progression, RoundActivation, plan_advance, readiness_reset},
    },
};

/// Primitive reads and writes available inside an open store transaction.
pub trait StoreTx: Send {
    /// Read the game header and hold its write lock until the transaction ends.
    fn lock_game(
        &mut self,
        game_id: &str,
    ) -> impl Future<Output = StoreResult<Option<GameRow>>> + Send;
    /// Insert a new game header.
    fn insert_game(&mut self, game: &GameRow) -> impl Future<Output = StoreResult<()>> + Send;
    /// Overwrite the phase and current round of a game.
    fn update_game(
        &mut self,
        game_id: &str,
        phase: GamePhase,
        current_round_index: Option<u32>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Whether `player_id` is registered.
    fn player_exists(&mut self, player_id: &str) -> impl Future<Output = StoreResult<bool>> + Send;
    /// Insert a registered player.
    fn insert_player(&mut self, player: &PlayerEntity)
    -> impl Future<Output = StoreResult<()>> + Send;
    /// Set the display name of an existing player; unknown ids are ignored.
    fn update_player_name(
        &mut self,
        player_id: &str,
        name: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Readiness of `player_id` in the game, `None` when not a member.
    fn membership(
        &mut self,
        game_id: &str,
        player_id: &str,
    ) -> impl Future<Output = StoreResult<Option<PlayerReadiness>>> + Send;
    /// Add a member in the `NotReady` state.
    fn insert_membership(
        &mut self,
        game_id: &str,
        player_id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;
    /// Update one member's readiness.
    fn set_readiness(
        &mut self,
        game_id: &str,
        player_id: &str,
        state: PlayerReadiness,
    ) -> impl Future<Output = StoreResult<()>> + Send;
    /// Members of the game in join order.
    fn members(&mut self, game_id: &str) -> impl Future<Output = StoreResult<Vec<MemberRow>>> + Send;
    /// Flip every member back to `NotReady`.
    fn reset_readiness(&mut self, game_id: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// Number of rounds the game was created with.
    fn round_count(&mut self, game_id: &str) -> impl Future<Output = StoreResult<u32>> + Send;
    /// Insert an unscheduled round.
    fn insert_round(
        &mut self,
        game_id: &str,
        index: u32,
        event_slug: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;
    /// Write the start and end time of a round.
    fn activate_round(
        &mut self,
        game_id: &str,
        activation: RoundActivation,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Whether the member already answered the round.
    fn choice_exists(
        &mut self,
        game_id: &str,
        round_index: u32,
        player_id: &str,
    ) -> impl Future<Output = StoreResult<bool>> + Send;
    /// Store a scored choice.
    fn insert_choice(
        &mut self,
        game_id: &str,
        choice: &RoundChoice,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Append rows contiguously to `channel`, assigning the next sequence ids in order.
    fn append_events(
        &mut self,
        channel: &str,
        events: Vec<NewOutboxEvent>,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The player was added and `player-joined` appended.
    Joined,
    /// The player was already a member; nothing was written.
    AlreadyMember,
}

/// Result of a ready request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyOutcome {
    /// False when the player was already ready and nothing was written.
    pub changed: bool,
    /// Whether this ready-up completed the set and advanced the game.
    pub advanced: bool,
    /// Phase after the transaction.
    pub phase: GamePhase,
}

/// Register a new player.
pub async fn create_player<T: StoreTx>(tx: &mut T, name: &str) -> StoreResult<PlayerEntity> {
    let player = PlayerEntity {
        id: new_id(),
        name: name.to_string(),
    };
    tx.insert_player(&player).await?;
    Ok(player)
}

/// Change a player's display name.
pub async fn rename_player<T: StoreTx>(
    tx: &mut T,
    player_id: &str,
    name: &str,
) -> StoreResult<PlayerEntity> {
    if !tx.player_exists(player_id).await? {
        return Err(StoreError::not_found(format!("player `{player_id}` not found")));
    }
    tx.update_player_name(player_id, name).await?;
    Ok(PlayerEntity {
        id: player_id.to_string(),
        name: name.to_string(),
    })
}

/// Create a joinable game with one round per slug. Appends nothing: the empty
/// channel (sequence 0) is the replay origin.
pub async fn create_game<T: StoreTx>(
    tx: &mut T,
    event_slugs: &[String],
    now: OffsetDateTime,
) -> StoreResult<GameState> {
    if event_slugs.is_empty() {
        return Err(StoreError::precondition("a game needs at least one round"));
    }
    let game = GameRow::joinable(new_id(), now);
    tx.insert_game(&game).await?;

    let mut rounds = Vec::with_capacity(event_slugs.len());
    for (index, slug) in (0u32..).zip(event_slugs) {
        tx.insert_round(&game.id, index, slug).await?;
        rounds.push(pending_round(index, slug.clone()));
    }

    Ok(GameState {
        id: game.id,
        phase: game.phase,
        current_round_index: game.current_round_index,
        created_at: game.created_at,
        players: Vec::new(),
        rounds,
    })
}

/// Add a player to a joinable game.
pub async fn join_game<T: StoreTx>(
    tx: &mut T,
    game_id: &str,
    player_id: &str,
) -> StoreResult<JoinOutcome> {
    let game = require_game(tx, game_id).await?;
    if !tx.player_exists(player_id).await? {
        return Err(StoreError::not_found(format!("player `{player_id}` not found")));
    }
    if tx.membership(game_id, player_id).await?.is_some() {
        return Ok(JoinOutcome::AlreadyMember);
    }
    if game.phase != GamePhase::Joinable {
        return Err(StoreError::precondition(format!(
            "game `{game_id}` is no longer joinable"
        )));
    }

    tx.insert_membership(game_id, player_id).await?;
    append(
        tx,
        game_id,
        vec![GameEvent::PlayerJoined(PlayerJoined {
            id: player_id.to_string(),
        })],
    )
    .await?;
    Ok(JoinOutcome::Joined)
}

/// Mark a member ready and advance the game when every member is ready.
///
/// The game row is locked first so concurrent last ready-ups serialize and only
/// one of them observes the complete set.
pub async fn ready_player<T: StoreTx>(
    tx: &mut T,
    game_id: &str,
    player_id: &str,
    progression: Progression,
    now: OffsetDateTime,
) -> StoreResult<ReadyOutcome> {
    let game = require_game(tx, game_id).await?;
    let Some(current) = tx.membership(game_id, player_id).await? else {
        return Err(StoreError::not_found(format!(
            "player `{player_id}` is not in game `{game_id}`"
        )));
    };
    if game.phase == GamePhase::Ended {
        return Err(StoreError::precondition(format!("game `{game_id}` has ended")));
    }
    if current == PlayerReadiness::Ready {
        return Ok(ReadyOutcome {
            changed: false,
            advanced: false,
            phase: game.phase,
        });
    }

    tx.set_readiness(game_id, player_id, PlayerReadiness::Ready)
        .await?;
    let mut events = vec![GameEvent::PlayerReadyChanged(PlayerReadyChanged {
        id: player_id.to_string(),
        state: PlayerReadiness::Ready,
    })];

    let members = tx.members(game_id).await?;
    if !members
        .iter()
        .all(|member| member.state == PlayerReadiness::Ready)
    {
        append(tx, game_id, events).await?;
        return Ok(ReadyOutcome {
            changed: true,
            advanced: false,
            phase: game.phase,
        });
    }

    let round_count = tx.round_count(game_id).await?;
    let advancement = plan_advance(
        game.phase,
        game.current_round_index,
        round_count,
        now,
        progression.timing,
    )
    .map_err(|err| StoreError::precondition(err.to_string()))?;

    tx.update_game(game_id, advancement.phase, advancement.current_round_index)
        .await?;
    if let Some(activation) = advancement.activation {
        tx.activate_round(game_id, activation).await?;
    }
    events.extend(GameEvent::batched(
        advancement.events,
        progression.batch_events,
    ));

    tx.reset_readiness(game_id).await?;
    let reset = readiness_reset(members.iter().map(|member| member.player_id.as_str()));
    events.extend(GameEvent::batched(reset, progression.batch_events));
    append(tx, game_id, events).await?;

    Ok(ReadyOutcome {
        changed: true,
        advanced: true,
        phase: advancement.phase,
    })
}

/// Record a member's choice for the current round. The score delta is written as given.
pub async fn submit_choice<T: StoreTx>(
    tx: &mut T,
    game_id: &str,
    choice: RoundChoice,
) -> StoreResult<()> {
    let game = require_game(tx, game_id).await?;
    if choice.round_index >= tx.round_count(game_id).await? {
        return Err(StoreError::not_found(format!(
            "round {} not found in game `{game_id}`",
            choice.round_index
        )));
    }
    if tx.membership(game_id, &choice.player_id).await?.is_none() {
        return Err(StoreError::not_found(format!(
            "player `{}` is not in game `{game_id}`",
            choice.player_id
        )));
    }
    if game.phase != GamePhase::InPlay || game.current_round_index != Some(choice.round_index) {
        return Err(StoreError::precondition(format!(
            "round {} is not the current round",
            choice.round_index
        )));
    }
    if tx
        .choice_exists(game_id, choice.round_index, &choice.player_id)
        .await?
    {
        return Err(StoreError::precondition(format!(
            "player `{}` already answered round {}",
            choice.player_id, choice.round_index
        )));
    }

    tx.insert_choice(game_id, &choice).await?;
    append(
        tx,
        game_id,
        vec![GameEvent::ChoiceSubmitted(ChoiceSubmitted {
            round_index: choice.round_index,
            player_id: choice.player_id,
            choice: choice.choice,
            score_delta: choice.score_delta,
        })],
    )
    .await
}

async fn require_game<T: StoreTx>(tx: &mut T, game_id: &str) -> StoreResult<GameRow> {
    tx.lock_game(game_id)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("game `{game_id}` not found")))
}

/// Append every event of one transaction as a single group.
async fn append<T: StoreTx>(tx: &mut T, game_id: &str, events: Vec<GameEvent>) -> StoreResult<()> {
    let last = u32::try_from(events.len().saturating_sub(1)).unwrap_or(u32::MAX);
    let rows = (0u32..)
        .zip(events)
        .map(|(position, event)| {
            let (name, payload) = event.into_parts()?;
            Ok(NewOutboxEvent {
                mutation_id: new_id(),
                name: name.to_string(),
                payload,
                group_remaining: last.saturating_sub(position),
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;
    tx.append_events(&game_channel(game_id), rows).await
}
