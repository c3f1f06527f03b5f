//! Process-local store used when no database is configured and in tests.
//!
//! All tables sit behind one async mutex. A transaction stages the rows it
//! touches (game records, players, appended outbox rows) next to the committed
//! tables and folds them in on commit, so an aborted operation leaves the
//! committed tables untouched and a write never copies unrelated history.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{GameStore, lease_expiry};
use crate::{
    dao::{
        models::{
            GameRow, MemberRow, NewOutboxEvent, OutboxRecord, PlayerEntity, game_channel,
            pending_round,
        },
        mutations::{self, JoinOutcome, ReadyOutcome, StoreTx},
        storage::{StorageResult, StoreError, StoreResult},
    },
    state::{
        game::{
            GamePhase, GameSnapshot, GameState, PlayerReadiness, PlayerSnapshot, RoundChoice,
            RoundState, now_millis,
        },
        state_machine::{Progression, RoundActivation},
    },
};

#[derive(Debug, Default)]
struct Tables {
    players: HashMap<String, PlayerEntity>,
    games: HashMap<String, GameRecord>,
    outbox: Outbox,
}

/// Outbox rows keyed by id, indexed per channel and by pending state.
#[derive(Debug, Default)]
struct Outbox {
    rows: HashMap<i64, OutboxRecord>,
    /// Row ids of each channel in sequence order; position `n` holds sequence `n + 1`.
    channels: HashMap<String, Vec<i64>>,
    unprocessed: BTreeSet<i64>,
    last_id: i64,
}

impl Outbox {
    fn head(&self, channel: &str) -> u64 {
        self.channels
            .get(channel)
            .map_or(0, |ids| ids.len() as u64)
    }

    fn insert(&mut self, record: OutboxRecord) {
        self.last_id = self.last_id.max(record.id);
        self.channels
            .entry(record.channel.clone())
            .or_default()
            .push(record.id);
        if !record.processed {
            self.unprocessed.insert(record.id);
        }
        self.rows.insert(record.id, record);
    }

    fn since(&self, channel: &str, after: u64) -> Vec<OutboxRecord> {
        let Some(ids) = self.channels.get(channel) else {
            return Vec::new();
        };
        let skip = usize::try_from(after).unwrap_or(usize::MAX).min(ids.len());
        ids[skip..]
            .iter()
            .filter_map(|id| self.rows.get(id).cloned())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct GameRecord {
    row: GameRow,
    rounds: Vec<RoundState>,
    members: IndexMap<String, PlayerReadiness>,
}

impl GameRecord {
    fn to_state(&self) -> GameState {
        GameState {
            id: self.row.id.clone(),
            phase: self.row.phase,
            current_round_index: self.row.current_round_index,
            created_at: self.row.created_at,
            players: self
                .members
                .iter()
                .map(|(id, state)| PlayerSnapshot {
                    id: id.clone(),
                    state: *state,
                })
                .collect(),
            rounds: self.rounds.clone(),
        }
    }
}

/// [`GameStore`] keeping every table in memory.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn begin(&self) -> MemoryTx {
        MemoryTx {
            committed: self.tables.clone().lock_owned().await,
            games: HashMap::new(),
            players: HashMap::new(),
            appended: Vec::new(),
        }
    }
}

/// Open transaction: the table lock plus the rows staged so far.
pub struct MemoryTx {
    committed: OwnedMutexGuard<Tables>,
    games: HashMap<String, GameRecord>,
    players: HashMap<String, PlayerEntity>,
    appended: Vec<OutboxRecord>,
}

impl MemoryTx {
    fn commit(self) {
        let MemoryTx {
            mut committed,
            games,
            players,
            appended,
        } = self;
        committed.games.extend(games);
        committed.players.extend(players);
        for record in appended {
            committed.outbox.insert(record);
        }
    }

    fn game(&self, game_id: &str) -> Option<&GameRecord> {
        self.games
            .get(game_id)
            .or_else(|| self.committed.games.get(game_id))
    }

    /// Staged copy of a game, taken from the committed tables on first write.
    fn game_mut(&mut self, game_id: &str) -> StoreResult<&mut GameRecord> {
        if !self.games.contains_key(game_id) {
            let committed = self
                .committed
                .games
                .get(game_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("game `{game_id}` not found")))?;
            self.games.insert(game_id.to_string(), committed);
        }
        self.games
            .get_mut(game_id)
            .ok_or_else(|| StoreError::not_found(format!("game `{game_id}` not found")))
    }

    fn player(&self, player_id: &str) -> Option<&PlayerEntity> {
        self.players
            .get(player_id)
            .or_else(|| self.committed.players.get(player_id))
    }

    fn head(&self, channel: &str) -> u64 {
        let staged = self
            .appended
            .iter()
            .filter(|record| record.channel == channel)
            .count() as u64;
        self.committed.outbox.head(channel) + staged
    }
}

impl StoreTx for MemoryTx {
    async fn lock_game(&mut self, game_id: &str) -> StoreResult<Option<GameRow>> {
        Ok(self.game(game_id).map(|game| game.row.clone()))
    }

    async fn insert_game(&mut self, game: &GameRow) -> StoreResult<()> {
        self.games.insert(
            game.id.clone(),
            GameRecord {
                row: game.clone(),
                rounds: Vec::new(),
                members: IndexMap::new(),
            },
        );
        Ok(())
    }

    async fn update_game(
        &mut self,
        game_id: &str,
        phase: GamePhase,
        current_round_index: Option<u32>,
    ) -> StoreResult<()> {
        let game = self.game_mut(game_id)?;
        game.row.phase = phase;
        game.row.current_round_index = current_round_index;
        Ok(())
    }

    async fn player_exists(&mut self, player_id: &str) -> StoreResult<bool> {
        Ok(self.player(player_id).is_some())
    }

    async fn insert_player(&mut self, player: &PlayerEntity) -> StoreResult<()> {
        self.players.insert(player.id.clone(), player.clone());
        Ok(())
    }

    async fn update_player_name(&mut self, player_id: &str, name: &str) -> StoreResult<()> {
        if let Some(player) = self.player(player_id) {
            let renamed = PlayerEntity {
                id: player.id.clone(),
                name: name.to_string(),
            };
            self.players.insert(renamed.id.clone(), renamed);
        }
        Ok(())
    }

    async fn membership(
        &mut self,
        game_id: &str,
        player_id: &str,
    ) -> StoreResult<Option<PlayerReadiness>> {
        Ok(self
            .game(game_id)
            .and_then(|game| game.members.get(player_id).copied()))
    }

    async fn insert_membership(&mut self, game_id: &str, player_id: &str) -> StoreResult<()> {
        self.game_mut(game_id)?
            .members
            .insert(player_id.to_string(), PlayerReadiness::NotReady);
        Ok(())
    }

    async fn set_readiness(
        &mut self,
        game_id: &str,
        player_id: &str,
        state: PlayerReadiness,
    ) -> StoreResult<()> {
        if let Some(slot) = self.game_mut(game_id)?.members.get_mut(player_id) {
            *slot = state;
        }
        Ok(())
    }

    async fn members(&mut self, game_id: &str) -> StoreResult<Vec<MemberRow>> {
        Ok(self
            .game(game_id)
            .map(|game| {
                game.members
                    .iter()
                    .map(|(player_id, state)| MemberRow {
                        player_id: player_id.clone(),
                        state: *state,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn reset_readiness(&mut self, game_id: &str) -> StoreResult<()> {
        for state in self.game_mut(game_id)?.members.values_mut() {
            *state = PlayerReadiness::NotReady;
        }
        Ok(())
    }

    async fn round_count(&mut self, game_id: &str) -> StoreResult<u32> {
        let count = self.game(game_id).map_or(0, |game| game.rounds.len());
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn insert_round(&mut self, game_id: &str, index: u32, event_slug: &str) -> StoreResult<()> {
        self.game_mut(game_id)?
            .rounds
            .push(pending_round(index, event_slug.to_string()));
        Ok(())
    }

    async fn activate_round(&mut self, game_id: &str, activation: RoundActivation) -> StoreResult<()> {
        let game = self.game_mut(game_id)?;
        if let Some(round) = game
            .rounds
            .iter_mut()
            .find(|round| round.index == activation.index)
        {
            round.start_time = Some(activation.start_time);
            round.end_time = Some(activation.end_time);
        }
        Ok(())
    }

    async fn choice_exists(
        &mut self,
        game_id: &str,
        round_index: u32,
        player_id: &str,
    ) -> StoreResult<bool> {
        Ok(self.game(game_id).is_some_and(|game| {
            game.rounds
                .iter()
                .any(|round| round.index == round_index && round.choice_of(player_id).is_some())
        }))
    }

    async fn insert_choice(&mut self, game_id: &str, choice: &RoundChoice) -> StoreResult<()> {
        let game = self.game_mut(game_id)?;
        let round = game
            .rounds
            .iter_mut()
            .find(|round| round.index == choice.round_index)
            .ok_or_else(|| StoreError::not_found(format!("round {} not found", choice.round_index)))?;
        round.choices.push(choice.clone());
        Ok(())
    }

    async fn append_events(&mut self, channel: &str, events: Vec<NewOutboxEvent>) -> StoreResult<()> {
        let mut head = self.head(channel);
        let mut id = self.committed.outbox.last_id + self.appended.len() as i64;
        for event in events {
            head += 1;
            id += 1;
            self.appended.push(OutboxRecord {
                id,
                channel: channel.to_string(),
                sequence_id: head,
                mutation_id: event.mutation_id,
                name: event.name,
                payload: event.payload,
                group_remaining: event.group_remaining,
                locked_by: None,
                lock_expiry: None,
                processed: false,
            });
        }
        Ok(())
    }
}

impl GameStore for MemoryGameStore {
    fn create_player(&self, name: String) -> BoxFuture<'static, StoreResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await;
            let player = mutations::create_player(&mut tx, &name).await?;
            tx.commit();
            Ok(player)
        })
    }

    fn rename_player(
        &self,
        player_id: String,
        name: String,
    ) -> BoxFuture<'static, StoreResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await;
            let player = mutations::rename_player(&mut tx, &player_id, &name).await?;
            tx.commit();
            Ok(player)
        })
    }

    fn find_player(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StoreResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let tables = store.tables.lock().await;
            Ok(tables.players.get(&player_id).cloned())
        })
    }

    fn create_game(&self, event_slugs: Vec<String>) -> BoxFuture<'static, StoreResult<GameState>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await;
            let game = mutations::create_game(&mut tx, &event_slugs, now_millis()).await?;
            tx.commit();
            Ok(game)
        })
    }

    fn round_slug(
        &self,
        game_id: String,
        round_index: u32,
    ) -> BoxFuture<'static, StoreResult<Option<String>>> {
        let store = self.clone();
        Box::pin(async move {
            let tables = store.tables.lock().await;
            Ok(tables.games.get(&game_id).and_then(|game| {
                game.rounds
                    .iter()
                    .find(|round| round.index == round_index)
                    .map(|round| round.event_slug.clone())
            }))
        })
    }

    fn join_game(
        &self,
        game_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StoreResult<JoinOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await;
            let outcome = mutations::join_game(&mut tx, &game_id, &player_id).await?;
            tx.commit();
            Ok(outcome)
        })
    }

    fn ready_player(
        &self,
        game_id: String,
        player_id: String,
        progression: Progression,
    ) -> BoxFuture<'static, StoreResult<ReadyOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await;
            let outcome =
                mutations::ready_player(&mut tx, &game_id, &player_id, progression, now_millis())
                    .await?;
            tx.commit();
            Ok(outcome)
        })
    }

    fn submit_choice(
        &self,
        game_id: String,
        choice: RoundChoice,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await;
            mutations::submit_choice(&mut tx, &game_id, choice).await?;
            tx.commit();
            Ok(())
        })
    }

    fn snapshot(&self, game_id: String) -> BoxFuture<'static, StoreResult<Option<GameSnapshot>>> {
        let store = self.clone();
        Box::pin(async move {
            let tables = store.tables.lock().await;
            let Some(game) = tables.games.get(&game_id) else {
                return Ok(None);
            };
            let sequence_id = tables.outbox.head(&game_channel(&game_id));
            Ok(Some(GameSnapshot {
                state: game.to_state(),
                sequence_id,
            }))
        })
    }

    fn events_since(
        &self,
        game_id: String,
        after: u64,
    ) -> BoxFuture<'static, StoreResult<Vec<OutboxRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            let channel = game_channel(&game_id);
            let tables = store.tables.lock().await;
            Ok(tables.outbox.since(&channel, after))
        })
    }

    fn claim_outbox(
        &self,
        node_id: String,
        lease: Duration,
        limit: u32,
    ) -> BoxFuture<'static, StoreResult<Vec<OutboxRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            let now = now_millis();
            let expiry = lease_expiry(now, lease);
            let mut tables = store.tables.lock().await;
            let outbox = &mut tables.outbox;
            let ids: Vec<i64> = outbox
                .unprocessed
                .iter()
                .copied()
                .filter(|id| outbox.rows.get(id).is_some_and(|row| row.claimable(now)))
                .take(limit as usize)
                .collect();
            let mut claimed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(row) = outbox.rows.get_mut(&id) {
                    row.locked_by = Some(node_id.clone());
                    row.lock_expiry = Some(expiry);
                    claimed.push(row.clone());
                }
            }
            Ok(claimed)
        })
    }

    fn mark_processed(&self, ids: Vec<i64>) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tables = store.tables.lock().await;
            for id in ids {
                if let Some(row) = tables.outbox.rows.get_mut(&id) {
                    row.processed = true;
                }
                tables.outbox.unprocessed.remove(&id);
            }
            Ok(())
        })
    }

    fn release_claims(&self, node_id: String) -> BoxFuture<'static, StoreResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tables = store.tables.lock().await;
            let Outbox {
                rows, unprocessed, ..
            } = &mut tables.outbox;
            let mut released = 0;
            for id in unprocessed.iter() {
                let Some(row) = rows.get_mut(id) else {
                    continue;
                };
                if row.locked_by.as_deref() == Some(node_id.as_str()) {
                    row.locked_by = None;
                    row.lock_expiry = None;
                    released += 1;
                }
            }
            Ok(released)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
