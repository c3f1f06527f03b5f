use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::{
    dto::game::{
        ChoiceAccepted, CreateGameRequest, GameCreated, JoinResponse, PhaseResponse,
        PlayerActionRequest, ReadyResponse, SubmitChoiceRequest,
    },
    error::AppError,
    routes::extract::ValidJson,
    services::game_service,
    state::{SharedState, game::GameSnapshot},
};

/// Game lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{id}/join", post(join_game))
        .route("/games/{id}/ready", post(ready_player))
        .route("/games/{id}/rounds/{index}/choice", post(submit_choice))
        .route("/games/{id}/state", get(game_state))
        .route("/games/{id}/phase", get(game_phase))
}

/// Create a joinable game.
#[utoipa::path(
    post,
    path = "/games",
    tag = "games",
    request_body = CreateGameRequest,
    responses(
        (status = 201, description = "Game created", body = GameCreated),
        (status = 400, description = "Invalid round content")
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    ValidJson(payload): ValidJson<CreateGameRequest>,
) -> Result<(StatusCode, Json<GameCreated>), AppError> {
    let created = game_service::create_game(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Join a game that has not started yet.
#[utoipa::path(
    post,
    path = "/games/{id}/join",
    tag = "games",
    params(("id" = String, Path, description = "Game identifier")),
    request_body = PlayerActionRequest,
    responses(
        (status = 200, description = "Player is a member", body = JoinResponse),
        (status = 404, description = "Unknown game or player"),
        (status = 409, description = "Game already started")
    )
)]
pub async fn join_game(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ValidJson(payload): ValidJson<PlayerActionRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(
        game_service::join_game(&state, id, payload.player_id).await?,
    ))
}

/// Mark a player ready; the game advances once everyone is ready.
#[utoipa::path(
    post,
    path = "/games/{id}/ready",
    tag = "games",
    params(("id" = String, Path, description = "Game identifier")),
    request_body = PlayerActionRequest,
    responses(
        (status = 200, description = "Readiness recorded", body = ReadyResponse),
        (status = 404, description = "Player is not a member"),
        (status = 409, description = "Game has ended")
    )
)]
pub async fn ready_player(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ValidJson(payload): ValidJson<PlayerActionRequest>,
) -> Result<Json<ReadyResponse>, AppError> {
    Ok(Json(
        game_service::ready_player(&state, id, payload.player_id).await?,
    ))
}

/// Lock in a choice for the current round.
#[utoipa::path(
    post,
    path = "/games/{id}/rounds/{index}/choice",
    tag = "games",
    params(
        ("id" = String, Path, description = "Game identifier"),
        ("index" = u32, Path, description = "Zero-based round index")
    ),
    request_body = SubmitChoiceRequest,
    responses(
        (status = 200, description = "Choice accepted", body = ChoiceAccepted),
        (status = 404, description = "Unknown round or player"),
        (status = 409, description = "Round not open or already answered"),
        (status = 502, description = "Round content unavailable")
    )
)]
pub async fn submit_choice(
    State(state): State<SharedState>,
    Path((id, index)): Path<(String, u32)>,
    ValidJson(payload): ValidJson<SubmitChoiceRequest>,
) -> Result<Json<ChoiceAccepted>, AppError> {
    Ok(Json(
        game_service::submit_choice(&state, id, index, payload.player_id, payload.choice).await?,
    ))
}

/// Full game state and the latest sequence id of its channel.
#[utoipa::path(
    get,
    path = "/games/{id}/state",
    tag = "games",
    params(("id" = String, Path, description = "Game identifier")),
    responses(
        (status = 200, description = "Game snapshot", body = GameSnapshot),
        (status = 404, description = "Unknown game")
    )
)]
pub async fn game_state(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<GameSnapshot>, AppError> {
    Ok(Json(game_service::game_state(&state, id).await?))
}

/// Read only the phase of a game.
#[utoipa::path(
    get,
    path = "/games/{id}/phase",
    tag = "games",
    params(("id" = String, Path, description = "Game identifier")),
    responses(
        (status = 200, description = "Game phase", body = PhaseResponse),
        (status = 404, description = "Unknown game")
    )
)]
pub async fn game_phase(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PhaseResponse>, AppError> {
    Ok(Json(game_service::game_phase(&state, id).await?))
}
