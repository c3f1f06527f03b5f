use rand::{rng, seq::SliceRandom};
use tracing::{debug, info};

use crate::{
    dao::mutations::JoinOutcome,
    dto::game::{
        ChoiceAccepted, CreateGameRequest, DEFAULT_ROUND_COUNT, GameCreated, JoinResponse,
        PhaseResponse, ReadyResponse,
    },
    error::ServiceError,
    services::{content::ContentError, scoring::ScoreError},
    state::{
        SharedState,
        game::{Choice, GameSnapshot, RoundChoice, ScoreDelta},
    },
};

/// Create a joinable game, drawing round content from the catalog when no slugs are given.
pub async fn create_game(
    state: &SharedState,
    request: CreateGameRequest,
) -> Result<GameCreated, ServiceError> {
    let store = state.require_game_store().await?;
    let event_slugs = match request.event_slugs {
        Some(slugs) => normalize_slugs(slugs)?,
        None => {
            let wanted = request.round_count.unwrap_or(DEFAULT_ROUND_COUNT) as usize;
            pick_random_slugs(state, wanted).await?
        }
    };

    let game = store.create_game(event_slugs.clone()).await?;
    info!(game_id = %game.id, rounds = event_slugs.len(), "game created");
    Ok(GameCreated {
        game_id: game.id,
        event_slugs,
    })
}

/// Add a player to a joinable game. Joining twice is accepted without effect.
pub async fn join_game(
    state: &SharedState,
    game_id: String,
    player_id: String,
) -> Result<JoinResponse, ServiceError> {
    let store = state.require_game_store().await?;
    let outcome = store.join_game(game_id.clone(), player_id.clone()).await?;
    if outcome == JoinOutcome::Joined {
        info!(%game_id, %player_id, "player joined");
        state.notify_outbox();
    }
    Ok(outcome.into())
}

/// Mark a player ready, advancing the game when the whole lobby is ready.
pub async fn ready_player(
    state: &SharedState,
    game_id: String,
    player_id: String,
) -> Result<ReadyResponse, ServiceError> {
    let store = state.require_game_store().await?;
    let progression = state.config().progression;
    let outcome = store
        .ready_player(game_id.clone(), player_id.clone(), progression)
        .await?;
    if outcome.changed {
        state.notify_outbox();
    }
    if outcome.advanced {
        info!(%game_id, phase = ?outcome.phase, "game advanced");
    } else {
        debug!(%game_id, %player_id, changed = outcome.changed, "player ready");
    }
    Ok(outcome.into())
}

/// Score and record a player's choice for the current round.
///
/// Content is fetched and scored before the write transaction opens; a content
/// failure aborts the submission without writing anything.
pub async fn submit_choice(
    state: &SharedState,
    game_id: String,
    round_index: u32,
    player_id: String,
    choice: Choice,
) -> Result<ChoiceAccepted, ServiceError> {
    let store = state.require_game_store().await?;
    let Some(slug) = store.round_slug(game_id.clone(), round_index).await? else {
        return Err(ServiceError::NotFound(format!(
            "round {round_index} not found in game `{game_id}`"
        )));
    };

    let score_delta = score_choice(state, &slug, &choice).await?;
    store
        .submit_choice(
            game_id.clone(),
            RoundChoice {
                player_id: player_id.clone(),
                round_index,
                choice,
                score_delta: score_delta.clone(),
            },
        )
        .await?;
    state.notify_outbox();
    info!(%game_id, round_index, %player_id, "choice submitted");
    Ok(ChoiceAccepted { score_delta })
}

/// Full state of a game together with its channel position.
pub async fn game_state(state: &SharedState, game_id: String) -> Result<GameSnapshot, ServiceError> {
    let store = state.require_game_store().await?;
    store
        .snapshot(game_id.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{game_id}` not found")))
}

/// Phase of a game and whether it still accepts players.
pub async fn game_phase(state: &SharedState, game_id: String) -> Result<PhaseResponse, ServiceError> {
    let snapshot = game_state(state, game_id).await?;
    Ok(snapshot.state.phase.into())
}

async fn score_choice(
    state: &SharedState,
    slug: &str,
    choice: &Choice,
) -> Result<ScoreDelta, ServiceError> {
    if choice.is_timeout() {
        return Ok(ScoreDelta::new());
    }
    let options = state.content().options(slug).await?;
    state
        .scorer()
        .score(&options, choice)
        .map_err(|err| match err {
            ScoreError::NoOptions => ServiceError::ContentUnavailable(ContentError::Unavailable(
                format!("`{slug}` has no options"),
            )),
            other => ServiceError::InvalidInput(other.to_string()),
        })
}

fn normalize_slugs(slugs: Vec<String>) -> Result<Vec<String>, ServiceError> {
    let slugs: Vec<String> = slugs
        .into_iter()
        .map(|slug| slug.trim().to_string())
        .collect();
    if slugs.is_empty() || slugs.iter().any(String::is_empty) {
        return Err(ServiceError::InvalidInput(
            "event slugs must be non-empty".into(),
        ));
    }
    Ok(slugs)
}

async fn pick_random_slugs(state: &SharedState, wanted: usize) -> Result<Vec<String>, ServiceError> {
    let mut slugs = state.content().slugs().await?;
    if slugs.len() < wanted {
        return Err(ServiceError::InvalidInput(format!(
            "not enough content for {wanted} rounds (found {})",
            slugs.len()
        )));
    }
    slugs.shuffle(&mut rng());
    slugs.truncate(wanted);
    Ok(slugs)
}
