use tracing::info;

use crate::{
    dto::{player::PlayerSummary, validation::MAX_NAME_CHARS},
    error::ServiceError,
    state::SharedState,
};

/// Register a player under a display name.
pub async fn create_player(state: &SharedState, name: String) -> Result<PlayerSummary, ServiceError> {
    let name = normalize_name(&name)?;
    let store = state.require_game_store().await?;
    let player = store.create_player(name).await?;
    info!(player_id = %player.id, "player registered");
    Ok(player.into())
}

/// Change a player's display name.
pub async fn rename_player(
    state: &SharedState,
    player_id: String,
    name: String,
) -> Result<PlayerSummary, ServiceError> {
    let name = normalize_name(&name)?;
    let store = state.require_game_store().await?;
    Ok(store.rename_player(player_id, name).await?.into())
}

/// Look a player up by id.
pub async fn find_player(state: &SharedState, player_id: String) -> Result<PlayerSummary, ServiceError> {
    let store = state.require_game_store().await?;
    store
        .find_player(player_id.clone())
        .await?
        .map(Into::into)
        .ok_or_else(|| ServiceError::NotFound(format!("player `{player_id}` not found")))
}

fn normalize_name(name: &str) -> Result<String, ServiceError> {
    let trimmed = name.trim();
    let count = trimmed.chars().count();
    if count == 0 || count > MAX_NAME_CHARS {
        return Err(ServiceError::InvalidInput(format!(
            "name must be between 1 and {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}
