#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use predictive_trivia_back::{
    client::replay,
    config::AppConfig,
    dao::game_store::GameStore,
    dto::{events::GameEvent, game::CreateGameRequest},
    error::ServiceError,
    services::{content::ContentOption, game_service, player_service},
    state::{
        AppState, SharedState,
        game::{Choice, GamePhase, GameSnapshot, PlayerReadiness},
    },
};

pub const SLUGS: [&str; 2] = ["btc-100k", "eth-5k"];

pub fn catalog() -> BTreeMap<String, Vec<ContentOption>> {
    SLUGS
        .iter()
        .map(|slug| {
            (
                slug.to_string(),
                vec![
                    ContentOption {
                        id: "yes".into(),
                        label: "Yes".into(),
                        signal: 0.62,
                    },
                    ContentOption {
                        id: "no".into(),
                        label: "No".into(),
                        signal: 0.38,
                    },
                ],
            )
        })
        .collect()
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.catalog = catalog();
    config.progression.timing.lead_in = Duration::ZERO;
    config.dispatcher.poll_interval = Duration::from_millis(20);
    config
}

pub async fn state_with(store: Arc<dyn GameStore>, config: AppConfig) -> SharedState {
    let state = AppState::new(config);
    state.install_game_store(store).await;
    state
}

pub async fn new_game(state: &SharedState) -> String {
    game_service::create_game(
        state,
        CreateGameRequest {
            event_slugs: Some(SLUGS.iter().map(|slug| slug.to_string()).collect()),
            round_count: None,
        },
    )
    .await
    .unwrap()
    .game_id
}

pub async fn new_players(state: &SharedState, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        ids.push(
            player_service::create_player(state, format!("player {n}"))
                .await
                .unwrap()
                .id,
        );
    }
    ids
}

pub async fn snapshot(state: &SharedState, game_id: &str) -> GameSnapshot {
    game_service::game_state(state, game_id.to_string())
        .await
        .unwrap()
}

/// Every committed leaf event of the game, batches flattened, in sequence order.
pub async fn leaf_events(state: &SharedState, game_id: &str) -> Vec<GameEvent> {
    let store = state.require_game_store().await.unwrap();
    let mut leaves = Vec::new();
    for record in store.events_since(game_id.to_string(), 0).await.unwrap() {
        flatten(record.delivery().decode().unwrap(), &mut leaves);
    }
    leaves
}

fn flatten(event: GameEvent, into: &mut Vec<GameEvent>) {
    match event {
        GameEvent::Batch(events) => events.into_iter().for_each(|event| flatten(event, into)),
        other => into.push(other),
    }
}

pub async fn count_named(state: &SharedState, game_id: &str, name: &str) -> usize {
    leaf_events(state, game_id)
        .await
        .iter()
        .filter(|event| event.name() == name)
        .count()
}

/// Two players join, play both rounds and finish the game.
///
/// Every intermediate snapshot is kept and must equal the replay of the log
/// prefix ending at its sequence id.
pub async fn two_player_game(state: &SharedState) {
    let batched = state.config().progression.batch_events;
    let game_id = new_game(state).await;
    let origin = snapshot(state, &game_id).await;
    assert_eq!(origin.sequence_id, 0);
    let players = new_players(state, 2).await;
    let mut checkpoints = Vec::new();

    for player in &players {
        let joined = game_service::join_game(state, game_id.clone(), player.clone())
            .await
            .unwrap();
        assert!(joined.joined);
        checkpoints.push(snapshot(state, &game_id).await);
    }
    assert_eq!(snapshot(state, &game_id).await.sequence_id, 2);

    let first = game_service::ready_player(state, game_id.clone(), players[0].clone())
        .await
        .unwrap();
    assert!(first.changed && !first.advanced);
    checkpoints.push(snapshot(state, &game_id).await);
    let second = game_service::ready_player(state, game_id.clone(), players[1].clone())
        .await
        .unwrap();
    assert!(second.advanced);
    assert_eq!(second.phase, GamePhase::InPlay);

    let started = snapshot(state, &game_id).await;
    assert_eq!(started.state.current_round_index, Some(0));
    assert!(started.state.current_round().unwrap().is_started());
    assert!(started.state.rounds[1].start_time.is_none());
    assert!(
        started
            .state
            .players
            .iter()
            .all(|player| player.state == PlayerReadiness::NotReady)
    );
    // joined x2, ready x2, then the advancement and reset either as two batch
    // rows or as three plus two single rows
    assert_eq!(started.sequence_id, if batched { 6 } else { 9 });
    assert!(started.state.invariants_hold());
    checkpoints.push(started);

    for round in 0..2u32 {
        game_service::submit_choice(
            state,
            game_id.clone(),
            round,
            players[0].clone(),
            Choice::Ranked(vec!["yes".into(), "no".into()]),
        )
        .await
        .unwrap();
        checkpoints.push(snapshot(state, &game_id).await);
        game_service::submit_choice(
            state,
            game_id.clone(),
            round,
            players[1].clone(),
            Choice::Probability(0.9),
        )
        .await
        .unwrap();
        let answered = snapshot(state, &game_id).await;
        assert!(answered.state.all_players_locked());
        checkpoints.push(answered);

        for player in &players {
            game_service::ready_player(state, game_id.clone(), player.clone())
                .await
                .unwrap();
            checkpoints.push(snapshot(state, &game_id).await);
        }
        assert!(snapshot(state, &game_id).await.state.invariants_hold());
    }

    let finished = snapshot(state, &game_id).await;
    assert_eq!(finished.state.phase, GamePhase::Ended);
    assert_eq!(finished.state.current_round_index, None);
    assert_eq!(finished.state.player_score(&players[0]), 4.0);
    assert_eq!(finished.state.player_score(&players[1]), 0.0);

    let err = game_service::ready_player(state, game_id.clone(), players[0].clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(
        snapshot(state, &game_id).await.sequence_id,
        finished.sequence_id
    );

    let store = state.require_game_store().await.unwrap();
    let records = store.events_since(game_id.clone(), 0).await.unwrap();
    let events: Vec<GameEvent> = records
        .iter()
        .map(|record| record.delivery().decode().unwrap())
        .collect();
    assert_eq!(events.len() as u64, finished.sequence_id);
    assert_eq!(replay(&origin.state, &events).unwrap(), finished.state);

    // Each snapshot sits on a transaction boundary and equals its log prefix.
    for checkpoint in &checkpoints {
        let prefix = checkpoint.sequence_id as usize;
        assert_eq!(records[prefix - 1].group_remaining, 0);
        assert_eq!(
            replay(&origin.state, &events[..prefix]).unwrap(),
            checkpoint.state,
            "replay diverges at sequence {prefix}"
        );
    }
}

/// A second submission for the same round is rejected and nothing is overwritten.
pub async fn duplicate_submit_is_rejected(state: &SharedState) {
    let game_id = new_game(state).await;
    let players = new_players(state, 1).await;
    game_service::join_game(state, game_id.clone(), players[0].clone())
        .await
        .unwrap();
    game_service::ready_player(state, game_id.clone(), players[0].clone())
        .await
        .unwrap();

    game_service::submit_choice(
        state,
        game_id.clone(),
        0,
        players[0].clone(),
        Choice::Ranked(vec!["yes".into()]),
    )
    .await
    .unwrap();
    let before = snapshot(state, &game_id).await;

    let err = game_service::submit_choice(
        state,
        game_id.clone(),
        0,
        players[0].clone(),
        Choice::Ranked(vec!["no".into()]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let after = snapshot(state, &game_id).await;
    assert_eq!(after, before);
    let round = after.state.current_round().unwrap();
    assert_eq!(round.choices.len(), 1);
    assert_eq!(round.choices[0].choice, Choice::Ranked(vec!["yes".into()]));
    assert_eq!(count_named(state, &game_id, "choice-submitted").await, 1);

    // Rounds other than the current one are not open.
    let err = game_service::submit_choice(
        state,
        game_id.clone(),
        1,
        players[0].clone(),
        Choice::timeout(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    let err = game_service::submit_choice(state, game_id, 9, players[0].clone(), Choice::timeout())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

/// Joining twice is a no-op; joining after the start is refused for newcomers only.
pub async fn join_is_idempotent(state: &SharedState) {
    let game_id = new_game(state).await;
    let players = new_players(state, 2).await;

    assert!(
        game_service::join_game(state, game_id.clone(), players[0].clone())
            .await
            .unwrap()
            .joined
    );
    assert!(
        !game_service::join_game(state, game_id.clone(), players[0].clone())
            .await
            .unwrap()
            .joined
    );
    assert_eq!(count_named(state, &game_id, "player-joined").await, 1);
    assert_eq!(snapshot(state, &game_id).await.state.players.len(), 1);

    game_service::ready_player(state, game_id.clone(), players[0].clone())
        .await
        .unwrap();
    let err = game_service::join_game(state, game_id.clone(), players[1].clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert!(
        !game_service::join_game(state, game_id.clone(), players[0].clone())
            .await
            .unwrap()
            .joined
    );

    assert!(matches!(
        game_service::join_game(state, "missing".into(), players[1].clone()).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        game_service::join_game(state, game_id, "nobody".into()).await,
        Err(ServiceError::NotFound(_))
    ));
}

/// Many players readying at once advance the game exactly once.
pub async fn concurrent_ready_advances_once(state: &SharedState, count: usize) {
    let game_id = new_game(state).await;
    let players = new_players(state, count).await;
    for player in &players {
        game_service::join_game(state, game_id.clone(), player.clone())
            .await
            .unwrap();
    }

    let tasks: Vec<_> = players
        .iter()
        .cloned()
        .map(|player| {
            let state = state.clone();
            let game_id = game_id.clone();
            tokio::spawn(async move { game_service::ready_player(&state, game_id, player).await })
        })
        .collect();

    let mut advanced = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().advanced {
            advanced += 1;
        }
    }
    assert_eq!(advanced, 1);

    let started = snapshot(state, &game_id).await;
    assert_eq!(started.state.phase, GamePhase::InPlay);
    assert_eq!(started.state.current_round_index, Some(0));
    assert!(started.state.invariants_hold());
    assert_eq!(count_named(state, &game_id, "phase-changed").await, 1);
    assert_eq!(count_named(state, &game_id, "round-time-changed").await, 1);
    assert_eq!(
        count_named(state, &game_id, "player-ready-changed").await,
        count * 2
    );
}
