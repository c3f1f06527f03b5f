use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::{
    dto::player::{PlayerNameRequest, PlayerSummary},
    error::AppError,
    routes::extract::ValidJson,
    services::player_service,
    state::SharedState,
};

/// Player registration endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/players", post(create_player))
        .route("/players/{id}", get(get_player).put(rename_player))
}

/// Register a new player.
#[utoipa::path(
    post,
    path = "/players",
    tag = "players",
    request_body = PlayerNameRequest,
    responses(
        (status = 201, description = "Player registered", body = PlayerSummary),
        (status = 400, description = "Invalid name")
    )
)]
pub async fn create_player(
    State(state): State<SharedState>,
    ValidJson(payload): ValidJson<PlayerNameRequest>,
) -> Result<(StatusCode, Json<PlayerSummary>), AppError> {
    let player = player_service::create_player(&state, payload.name).await?;
    Ok((StatusCode::CREATED, Json(player)))
}

/// Change a player's display name.
#[utoipa::path(
    put,
    path = "/players/{id}",
    tag = "players",
    params(("id" = String, Path, description = "Player identifier")),
    request_body = PlayerNameRequest,
    responses(
        (status = 200, description = "Player renamed", body = PlayerSummary),
        (status = 404, description = "Unknown player")
    )
)]
pub async fn rename_player(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ValidJson(payload): ValidJson<PlayerNameRequest>,
) -> Result<Json<PlayerSummary>, AppError> {
    Ok(Json(
        player_service::rename_player(&state, id, payload.name).await?,
    ))
}

/// Look up a registered player.
#[utoipa::path(
    get,
    path = "/players/{id}",
    tag = "players",
    params(("id" = String, Path, description = "Player identifier")),
    responses(
        (status = 200, description = "Player", body = PlayerSummary),
        (status = 404, description = "Unknown player")
    )
)]
pub async fn get_player(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PlayerSummary>, AppError> {
    Ok(Json(player_service::find_player(&state, id).await?))
}
