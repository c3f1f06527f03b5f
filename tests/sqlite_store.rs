//! Game lifecycle scenarios against SQLite.
#![cfg(feature = "sqlite-store")]

mod common;

use std::sync::Arc;

use predictive_trivia_back::{
    config::AppConfig,
    dao::game_store::{GameStore, sqlite::SqliteGameStore},
    state::SharedState,
};

async fn sqlite_state_with(config: AppConfig) -> SharedState {
    let store: Arc<dyn GameStore> = Arc::new(
        SqliteGameStore::connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite opens"),
    );
    common::state_with(store, config).await
}

async fn sqlite_state() -> SharedState {
    sqlite_state_with(common::test_config()).await
}

#[tokio::test]
async fn two_players_finish_a_game() {
    common::two_player_game(&sqlite_state().await).await;
}

#[tokio::test]
async fn two_players_finish_a_game_with_unbatched_events() {
    let mut config = common::test_config();
    config.progression.batch_events = false;
    common::two_player_game(&sqlite_state_with(config).await).await;
}

#[tokio::test]
async fn second_choice_for_a_round_is_rejected() {
    common::duplicate_submit_is_rejected(&sqlite_state().await).await;
}

#[tokio::test]
async fn join_twice_is_a_noop() {
    common::join_is_idempotent(&sqlite_state().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_ready_ups_advance_once() {
    common::concurrent_ready_advances_once(&sqlite_state().await, 8).await;
}

#[tokio::test]
async fn snapshot_survives_round_trip_through_rows() {
    let state = sqlite_state().await;
    let game_id = common::new_game(&state).await;
    let snapshot = common::snapshot(&state, &game_id).await;
    assert_eq!(snapshot.state.rounds.len(), common::SLUGS.len());
    assert_eq!(snapshot.state.rounds[1].event_slug, common::SLUGS[1]);
    assert_eq!(snapshot.sequence_id, 0);
}
