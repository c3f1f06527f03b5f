pub mod memory;
/// SQLite backend.
#[cfg(feature = "sqlite-store")]
pub mod sqlite;

use std::time::Duration;

use futures::future::BoxFuture;

use crate::dao::models::{OutboxRecord, PlayerEntity};
use crate::dao::mutations::{JoinOutcome, ReadyOutcome};
use crate::dao::storage::{StorageResult, StoreResult};
use crate::state::game::{GameSnapshot, GameState, RoundChoice};
use crate::state::state_machine::Progression;

/// Abstraction over the persistence layer for games, players and the outbox.
///
/// Every mutating method is one transaction covering both the state change and
/// the events appended for it.
pub trait GameStore: Send + Sync {
    /// Register a player under a fresh id.
    fn create_player(&self, name: String) -> BoxFuture<'static, StoreResult<PlayerEntity>>;
    /// Change a player's display name.
    fn rename_player(
        &self,
        player_id: String,
        name: String,
    ) -> BoxFuture<'static, StoreResult<PlayerEntity>>;
    /// Look up a registered player.
    fn find_player(&self, player_id: String)
    -> BoxFuture<'static, StoreResult<Option<PlayerEntity>>>;

    /// Create a joinable game with one pending round per slug.
    fn create_game(&self, event_slugs: Vec<String>) -> BoxFuture<'static, StoreResult<GameState>>;
    /// Content reference of a round, read outside any write transaction.
    fn round_slug(
        &self,
        game_id: String,
        round_index: u32,
    ) -> BoxFuture<'static, StoreResult<Option<String>>>;

    /// Add a player to a joinable game.
    fn join_game(
        &self,
        game_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StoreResult<JoinOutcome>>;
    /// Mark a member ready, advancing the game once every member is.
    fn ready_player(
        &self,
        game_id: String,
        player_id: String,
        progression: Progression,
    ) -> BoxFuture<'static, StoreResult<ReadyOutcome>>;
    /// Record a scored choice for the current round.
    fn submit_choice(
        &self,
        game_id: String,
        choice: RoundChoice,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Full state plus the highest sequence id of the game's channel, read consistently.
    fn snapshot(&self, game_id: String) -> BoxFuture<'static, StoreResult<Option<GameSnapshot>>>;
    /// Rows of the game's channel with `sequence_id > after`, in sequence order.
    fn events_since(
        &self,
        game_id: String,
        after: u64,
    ) -> BoxFuture<'static, StoreResult<Vec<OutboxRecord>>>;

    /// Lease up to `limit` unprocessed rows whose lock is absent or expired, in `id` order.
    fn claim_outbox(
        &self,
        node_id: String,
        lease: Duration,
        limit: u32,
    ) -> BoxFuture<'static, StoreResult<Vec<OutboxRecord>>>;
    /// Flag rows as published so they are never claimed again.
    fn mark_processed(&self, ids: Vec<i64>) -> BoxFuture<'static, StoreResult<()>>;
    /// Drop the leases `node_id` holds on rows it never finished.
    fn release_claims(&self, node_id: String) -> BoxFuture<'static, StoreResult<u64>>;

    /// Cheap round trip used by the storage supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

fn lease_expiry(now: time::OffsetDateTime, lease: Duration) -> time::OffsetDateTime {
    now.saturating_add(time::Duration::try_from(lease).unwrap_or(time::Duration::MAX))
}
