//! SQLite-backed store.
//!
//! Every mutation opens a transaction whose first statement touches the game row,
//! which takes SQLite's write lock and plays the role of `SELECT ... FOR UPDATE`.

use std::{str::FromStr, time::Duration};

use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::{
    Row, Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use tracing::info;

use super::{GameStore, lease_expiry};
use crate::{
    dao::{
        models::{
            GameRow, MemberRow, NewOutboxEvent, OutboxRecord, PlayerEntity, game_channel,
        },
        mutations::{self, JoinOutcome, ReadyOutcome, StoreTx},
        storage::{StorageError, StorageResult, StoreError, StoreResult},
    },
    state::{
        game::{
            Choice, GamePhase, GameSnapshot, GameState, PlayerReadiness, PlayerSnapshot,
            RoundChoice, RoundState, from_unix_millis, now_millis, to_unix_millis,
        },
        state_machine::{Progression, RoundActivation},
    },
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS players (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    phase TEXT NOT NULL,
    current_round_index INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rounds (
    game_id TEXT NOT NULL REFERENCES games(id),
    round_index INTEGER NOT NULL,
    event_slug TEXT NOT NULL,
    start_time INTEGER,
    end_time INTEGER,
    PRIMARY KEY (game_id, round_index)
);

CREATE TABLE IF NOT EXISTS game_players (
    game_id TEXT NOT NULL REFERENCES games(id),
    player_id TEXT NOT NULL REFERENCES players(id),
    state TEXT NOT NULL,
    PRIMARY KEY (game_id, player_id)
);

CREATE TABLE IF NOT EXISTS round_choices (
    game_id TEXT NOT NULL,
    round_index INTEGER NOT NULL,
    player_id TEXT NOT NULL,
    choice TEXT NOT NULL,
    score_delta TEXT NOT NULL,
    PRIMARY KEY (game_id, round_index, player_id),
    FOREIGN KEY (game_id, round_index) REFERENCES rounds(game_id, round_index)
);

CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    mutation_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    payload TEXT NOT NULL,
    group_remaining INTEGER NOT NULL DEFAULT 0,
    locked_by TEXT,
    lock_expiry INTEGER,
    processed INTEGER NOT NULL DEFAULT 0,
    UNIQUE (channel, sequence_id)
);

CREATE INDEX IF NOT EXISTS outbox_pending ON outbox (processed, id);
"#;

const OUTBOX_COLUMNS: &str = "id, channel, sequence_id, mutation_id, name, payload, \
     group_remaining, locked_by, lock_expiry, processed";

fn query_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| StoreError::Storage(StorageError::unavailable(context.to_string(), err))
}

fn corrupt(message: impl Into<String>) -> StoreError {
    StoreError::Storage(StorageError::Corrupt(message.into()))
}

/// [`GameStore`] backed by a SQLite database through `sqlx`.
#[derive(Clone)]
pub struct SqliteGameStore {
    pool: SqlitePool,
}

impl SqliteGameStore {
    /// Open (creating if missing) the database at `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|err| StorageError::unavailable(format!("invalid database url `{url}`"), err))?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `:memory:` is a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|err| StorageError::unavailable("failed to open SQLite pool".into(), err))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::unavailable("failed to create schema".into(), err))?;
        Ok(())
    }

    async fn begin(&self) -> StoreResult<SqliteTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(query_error("failed to begin transaction"))?;
        Ok(SqliteTx { tx })
    }
}

/// Open SQLite transaction. Dropping it without [`SqliteTx::commit`] rolls back.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(query_error("failed to commit transaction"))
    }
}

impl StoreTx for SqliteTx {
    async fn lock_game(&mut self, game_id: &str) -> StoreResult<Option<GameRow>> {
        sqlx::query("UPDATE games SET id = id WHERE id = ?")
            .bind(game_id)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to lock game"))?;
        let row = sqlx::query(
            "SELECT id, phase, current_round_index, created_at FROM games WHERE id = ?",
        )
        .bind(game_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(query_error("failed to load game"))?;
        row.as_ref().map(game_from_row).transpose()
    }

    async fn insert_game(&mut self, game: &GameRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO games (id, phase, current_round_index, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&game.id)
        .bind(game.phase.as_str())
        .bind(game.current_round_index.map(i64::from))
        .bind(to_unix_millis(game.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(query_error("failed to insert game"))?;
        Ok(())
    }

    async fn update_game(
        &mut self,
        game_id: &str,
        phase: GamePhase,
        current_round_index: Option<u32>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE games SET phase = ?, current_round_index = ? WHERE id = ?")
            .bind(phase.as_str())
            .bind(current_round_index.map(i64::from))
            .bind(game_id)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to update game"))?;
        Ok(())
    }

    async fn player_exists(&mut self, player_id: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM players WHERE id = ?")
            .bind(player_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(query_error("failed to look up player"))?;
        Ok(row.is_some())
    }

    async fn insert_player(&mut self, player: &PlayerEntity) -> StoreResult<()> {
        sqlx::query("INSERT INTO players (id, name) VALUES (?, ?)")
            .bind(&player.id)
            .bind(&player.name)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to insert player"))?;
        Ok(())
    }

    async fn update_player_name(&mut self, player_id: &str, name: &str) -> StoreResult<()> {
        sqlx::query("UPDATE players SET name = ? WHERE id = ?")
            .bind(name)
            .bind(player_id)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to rename player"))?;
        Ok(())
    }

    async fn membership(
        &mut self,
        game_id: &str,
        player_id: &str,
    ) -> StoreResult<Option<PlayerReadiness>> {
        let row = sqlx::query("SELECT state FROM game_players WHERE game_id = ? AND player_id = ?")
            .bind(game_id)
            .bind(player_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(query_error("failed to look up membership"))?;
        row.map(|row| readiness_column(&row, "state")).transpose()
    }

    async fn insert_membership(&mut self, game_id: &str, player_id: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO game_players (game_id, player_id, state) VALUES (?, ?, ?)")
            .bind(game_id)
            .bind(player_id)
            .bind(PlayerReadiness::NotReady.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to insert membership"))?;
        Ok(())
    }

    async fn set_readiness(
        &mut self,
        game_id: &str,
        player_id: &str,
        state: PlayerReadiness,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE game_players SET state = ? WHERE game_id = ? AND player_id = ?")
            .bind(state.as_str())
            .bind(game_id)
            .bind(player_id)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to update readiness"))?;
        Ok(())
    }

    async fn members(&mut self, game_id: &str) -> StoreResult<Vec<MemberRow>> {
        let rows = sqlx::query(
            "SELECT player_id, state FROM game_players WHERE game_id = ? ORDER BY rowid",
        )
        .bind(game_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(query_error("failed to list members"))?;
        rows.iter()
            .map(|row| {
                Ok(MemberRow {
                    player_id: text(row, "player_id")?,
                    state: readiness_column(row, "state")?,
                })
            })
            .collect()
    }

    async fn reset_readiness(&mut self, game_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE game_players SET state = ? WHERE game_id = ?")
            .bind(PlayerReadiness::NotReady.as_str())
            .bind(game_id)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to reset readiness"))?;
        Ok(())
    }

    async fn round_count(&mut self, game_id: &str) -> StoreResult<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS rounds FROM rounds WHERE game_id = ?")
            .bind(game_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(query_error("failed to count rounds"))?;
        let count: i64 = row
            .try_get("rounds")
            .map_err(query_error("failed to read round count"))?;
        u32::try_from(count).map_err(|_| corrupt(format!("invalid round count {count}")))
    }

    async fn insert_round(&mut self, game_id: &str, index: u32, event_slug: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO rounds (game_id, round_index, event_slug) VALUES (?, ?, ?)")
            .bind(game_id)
            .bind(i64::from(index))
            .bind(event_slug)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to insert round"))?;
        Ok(())
    }

    async fn activate_round(&mut self, game_id: &str, activation: RoundActivation) -> StoreResult<()> {
        sqlx::query(
            "UPDATE rounds SET start_time = ?, end_time = ? WHERE game_id = ? AND round_index = ?",
        )
        .bind(to_unix_millis(activation.start_time))
        .bind(to_unix_millis(activation.end_time))
        .bind(game_id)
        .bind(i64::from(activation.index))
        .execute(&mut *self.tx)
        .await
        .map_err(query_error("failed to activate round"))?;
        Ok(())
    }

    async fn choice_exists(
        &mut self,
        game_id: &str,
        round_index: u32,
        player_id: &str,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM round_choices WHERE game_id = ? AND round_index = ? AND player_id = ?",
        )
        .bind(game_id)
        .bind(i64::from(round_index))
        .bind(player_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(query_error("failed to look up choice"))?;
        Ok(row.is_some())
    }

    async fn insert_choice(&mut self, game_id: &str, choice: &RoundChoice) -> StoreResult<()> {
        let raw = serde_json::to_string(&choice.choice)?;
        let delta = serde_json::to_string(&choice.score_delta)?;
        sqlx::query(
            "INSERT INTO round_choices (game_id, round_index, player_id, choice, score_delta) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(game_id)
        .bind(i64::from(choice.round_index))
        .bind(&choice.player_id)
        .bind(raw)
        .bind(delta)
        .execute(&mut *self.tx)
        .await
        .map_err(query_error("failed to insert choice"))?;
        Ok(())
    }

    async fn append_events(&mut self, channel: &str, events: Vec<NewOutboxEvent>) -> StoreResult<()> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence_id), 0) AS head FROM outbox WHERE channel = ?",
        )
        .bind(channel)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(query_error("failed to read channel head"))?;
        let mut head: i64 = row
            .try_get("head")
            .map_err(query_error("failed to read channel head"))?;

        for event in events {
            head += 1;
            sqlx::query(
                "INSERT INTO outbox \
                 (channel, sequence_id, mutation_id, name, payload, group_remaining) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(channel)
            .bind(head)
            .bind(&event.mutation_id)
            .bind(&event.name)
            .bind(event.payload.to_string())
            .bind(i64::from(event.group_remaining))
            .execute(&mut *self.tx)
            .await
            .map_err(query_error("failed to append outbox event"))?;
        }
        Ok(())
    }
}

impl GameStore for SqliteGameStore {
    fn create_player(&self, name: String) -> BoxFuture<'static, StoreResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await?;
            let player = mutations::create_player(&mut tx, &name).await?;
            tx.commit().await?;
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
            let mut tx = store.begin().await?;
            let player = mutations::rename_player(&mut tx, &player_id, &name).await?;
            tx.commit().await?;
            Ok(player)
        })
    }

    fn find_player(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StoreResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let row = sqlx::query("SELECT id, name FROM players WHERE id = ?")
                .bind(&player_id)
                .fetch_optional(&store.pool)
                .await
                .map_err(query_error("failed to load player"))?;
            row.map(|row| {
                Ok(PlayerEntity {
                    id: text(&row, "id")?,
                    name: text(&row, "name")?,
                })
            })
            .transpose()
        })
    }

    fn create_game(&self, event_slugs: Vec<String>) -> BoxFuture<'static, StoreResult<GameState>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await?;
            let game = mutations::create_game(&mut tx, &event_slugs, now_millis()).await?;
            tx.commit().await?;
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
            let row =
                sqlx::query("SELECT event_slug FROM rounds WHERE game_id = ? AND round_index = ?")
                    .bind(&game_id)
                    .bind(i64::from(round_index))
                    .fetch_optional(&store.pool)
                    .await
                    .map_err(query_error("failed to load round"))?;
            row.map(|row| text(&row, "event_slug")).transpose()
        })
    }

    fn join_game(
        &self,
        game_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StoreResult<JoinOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await?;
            let outcome = mutations::join_game(&mut tx, &game_id, &player_id).await?;
            tx.commit().await?;
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
            let mut tx = store.begin().await?;
            let outcome =
                mutations::ready_player(&mut tx, &game_id, &player_id, progression, now_millis())
                    .await?;
            tx.commit().await?;
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
            let mut tx = store.begin().await?;
            mutations::submit_choice(&mut tx, &game_id, choice).await?;
            tx.commit().await
        })
    }

    fn snapshot(&self, game_id: String) -> BoxFuture<'static, StoreResult<Option<GameSnapshot>>> {
        let store = self.clone();
        Box::pin(async move {
            // One read transaction so the state and the channel head agree.
            let mut tx = store.begin().await?;
            let snapshot = load_snapshot(&mut tx.tx, &game_id).await?;
            tx.commit().await?;
            Ok(snapshot)
        })
    }

    fn events_since(
        &self,
        game_id: String,
        after: u64,
    ) -> BoxFuture<'static, StoreResult<Vec<OutboxRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            let after = i64::try_from(after).unwrap_or(i64::MAX);
            let rows = sqlx::query(&format!(
                "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE channel = ? AND sequence_id > ? \
                 ORDER BY sequence_id"
            ))
            .bind(game_channel(&game_id))
            .bind(after)
            .fetch_all(&store.pool)
            .await
            .map_err(query_error("failed to read outbox"))?;
            rows.iter().map(outbox_from_row).collect()
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
            let mut tx = store.begin().await?;
            // Take the write lock before selecting so two nodes never claim the same rows.
            sqlx::query("UPDATE outbox SET id = id WHERE id = -1")
                .execute(&mut *tx.tx)
                .await
                .map_err(query_error("failed to lock outbox"))?;
            let rows = sqlx::query(&format!(
                "SELECT {OUTBOX_COLUMNS} FROM outbox \
                 WHERE processed = 0 AND (locked_by IS NULL OR lock_expiry IS NULL OR lock_expiry <= ?) \
                 ORDER BY id LIMIT ?"
            ))
            .bind(to_unix_millis(now))
            .bind(i64::from(limit))
            .fetch_all(&mut *tx.tx)
            .await
            .map_err(query_error("failed to select claimable rows"))?;

            let mut claimed = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut record = outbox_from_row(row)?;
                sqlx::query("UPDATE outbox SET locked_by = ?, lock_expiry = ? WHERE id = ?")
                    .bind(&node_id)
                    .bind(to_unix_millis(expiry))
                    .bind(record.id)
                    .execute(&mut *tx.tx)
                    .await
                    .map_err(query_error("failed to claim row"))?;
                record.locked_by = Some(node_id.clone());
                record.lock_expiry = Some(expiry);
                claimed.push(record);
            }
            tx.commit().await?;
            Ok(claimed)
        })
    }

    fn mark_processed(&self, ids: Vec<i64>) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tx = store.begin().await?;
            for id in ids {
                sqlx::query("UPDATE outbox SET processed = 1 WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx.tx)
                    .await
                    .map_err(query_error("failed to mark row processed"))?;
            }
            tx.commit().await
        })
    }

    fn release_claims(&self, node_id: String) -> BoxFuture<'static, StoreResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE outbox SET locked_by = NULL, lock_expiry = NULL \
                 WHERE locked_by = ? AND processed = 0",
            )
            .bind(&node_id)
            .execute(&store.pool)
            .await
            .map_err(query_error("failed to release claims"))?;
            Ok(result.rows_affected())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&store.pool)
                .await
                .map_err(|err| StorageError::unavailable("SQLite health check failed".into(), err))?;
            Ok(())
        })
    }
}

async fn load_snapshot(
    tx: &mut Transaction<'static, Sqlite>,
    game_id: &str,
) -> StoreResult<Option<GameSnapshot>> {
    let Some(row) =
        sqlx::query("SELECT id, phase, current_round_index, created_at FROM games WHERE id = ?")
            .bind(game_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(query_error("failed to load game"))?
    else {
        return Ok(None);
    };
    let game = game_from_row(&row)?;

    let players = sqlx::query(
        "SELECT player_id, state FROM game_players WHERE game_id = ? ORDER BY rowid",
    )
    .bind(game_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(query_error("failed to load members"))?
    .iter()
    .map(|row| {
        Ok(PlayerSnapshot {
            id: text(row, "player_id")?,
            state: readiness_column(row, "state")?,
        })
    })
    .collect::<StoreResult<Vec<_>>>()?;

    let mut rounds = sqlx::query(
        "SELECT round_index, event_slug, start_time, end_time FROM rounds \
         WHERE game_id = ? ORDER BY round_index",
    )
    .bind(game_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(query_error("failed to load rounds"))?
    .iter()
    .map(round_from_row)
    .collect::<StoreResult<Vec<_>>>()?;

    let choices = sqlx::query(
        "SELECT round_index, player_id, choice, score_delta FROM round_choices \
         WHERE game_id = ? ORDER BY rowid",
    )
    .bind(game_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(query_error("failed to load choices"))?;
    for row in &choices {
        let choice = choice_from_row(row)?;
        if let Some(round) = rounds
            .iter_mut()
            .find(|round| round.index == choice.round_index)
        {
            round.choices.push(choice);
        }
    }

    let head = sqlx::query(
        "SELECT COALESCE(MAX(sequence_id), 0) AS head FROM outbox WHERE channel = ?",
    )
    .bind(game_channel(game_id))
    .fetch_one(&mut **tx)
    .await
    .map_err(query_error("failed to read channel head"))?;
    let sequence_id: i64 = head
        .try_get("head")
        .map_err(query_error("failed to read channel head"))?;

    Ok(Some(GameSnapshot {
        state: GameState {
            id: game.id,
            phase: game.phase,
            current_round_index: game.current_round_index,
            created_at: game.created_at,
            players,
            rounds,
        },
        sequence_id: u64::try_from(sequence_id).unwrap_or_default(),
    }))
}

fn text(row: &SqliteRow, column: &'static str) -> StoreResult<String> {
    row.try_get(column).map_err(query_error(column))
}

fn index_column(row: &SqliteRow, column: &'static str) -> StoreResult<Option<u32>> {
    let value: Option<i64> = row.try_get(column).map_err(query_error(column))?;
    value
        .map(|value| u32::try_from(value).map_err(|_| corrupt(format!("invalid {column} {value}"))))
        .transpose()
}

fn time_column(
    row: &SqliteRow,
    column: &'static str,
) -> StoreResult<Option<time::OffsetDateTime>> {
    let value: Option<i64> = row.try_get(column).map_err(query_error(column))?;
    value
        .map(|millis| {
            from_unix_millis(millis).ok_or_else(|| corrupt(format!("invalid {column} {millis}")))
        })
        .transpose()
}

fn readiness_column(row: &SqliteRow, column: &'static str) -> StoreResult<PlayerReadiness> {
    let value = text(row, column)?;
    PlayerReadiness::parse(&value).ok_or_else(|| corrupt(format!("unknown readiness `{value}`")))
}

fn game_from_row(row: &SqliteRow) -> StoreResult<GameRow> {
    let phase = text(row, "phase")?;
    Ok(GameRow {
        id: text(row, "id")?,
        phase: GamePhase::parse(&phase).ok_or_else(|| corrupt(format!("unknown phase `{phase}`")))?,
        current_round_index: index_column(row, "current_round_index")?,
        created_at: time_column(row, "created_at")?
            .ok_or_else(|| corrupt("game without creation time"))?,
    })
}

fn round_from_row(row: &SqliteRow) -> StoreResult<RoundState> {
    Ok(RoundState {
        index: index_column(row, "round_index")?.ok_or_else(|| corrupt("round without index"))?,
        event_slug: text(row, "event_slug")?,
        start_time: time_column(row, "start_time")?,
        end_time: time_column(row, "end_time")?,
        choices: Vec::new(),
    })
}

fn choice_from_row(row: &SqliteRow) -> StoreResult<RoundChoice> {
    let choice: Choice = serde_json::from_str(&text(row, "choice")?)?;
    Ok(RoundChoice {
        player_id: text(row, "player_id")?,
        round_index: index_column(row, "round_index")?
            .ok_or_else(|| corrupt("choice without round"))?,
        choice,
        score_delta: serde_json::from_str(&text(row, "score_delta")?)?,
    })
}

fn outbox_from_row(row: &SqliteRow) -> StoreResult<OutboxRecord> {
    let sequence_id: i64 = row
        .try_get("sequence_id")
        .map_err(query_error("sequence_id"))?;
    let processed: i64 = row.try_get("processed").map_err(query_error("processed"))?;
    let group_remaining: i64 = row
        .try_get("group_remaining")
        .map_err(query_error("group_remaining"))?;
    let payload: Value = serde_json::from_str(&text(row, "payload")?)?;
    Ok(OutboxRecord {
        id: row.try_get("id").map_err(query_error("id"))?,
        channel: text(row, "channel")?,
        sequence_id: u64::try_from(sequence_id)
            .map_err(|_| corrupt(format!("invalid sequence id {sequence_id}")))?,
        mutation_id: text(row, "mutation_id")?,
        name: text(row, "name")?,
        payload,
        group_remaining: u32::try_from(group_remaining)
            .map_err(|_| corrupt(format!("invalid group size {group_remaining}")))?,
        locked_by: row.try_get("locked_by").map_err(query_error("locked_by"))?,
        lock_expiry: time_column(row, "lock_expiry")?,
        processed: processed != 0,
    })
}
