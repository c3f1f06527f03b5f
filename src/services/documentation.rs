use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the trivia backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::player::create_player,
        crate::routes::player::rename_player,
        crate::routes::player::get_player,
        crate::routes::game::create_game,
        crate::routes::game::join_game,
        crate::routes::game::ready_player,
        crate::routes::game::submit_choice,
        crate::routes::game::game_state,
        crate::routes::game::game_phase,
        crate::routes::sse::game_events,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::player::PlayerNameRequest,
            crate::dto::player::PlayerSummary,
            crate::dto::game::CreateGameRequest,
            crate::dto::game::GameCreated,
            crate::dto::game::PlayerActionRequest,
            crate::dto::game::JoinResponse,
            crate::dto::game::ReadyResponse,
            crate::dto::game::SubmitChoiceRequest,
            crate::dto::game::ChoiceAccepted,
            crate::dto::game::PhaseResponse,
            crate::dto::sse::EventDelivery,
            crate::state::game::GameSnapshot,
            crate::state::game::GameState,
            crate::state::game::GamePhase,
            crate::state::game::PlayerReadiness,
            crate::state::game::Choice,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "players", description = "Player registration"),
        (name = "games", description = "Game lifecycle and state"),
        (name = "sse", description = "Server-sent event streams"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/players",
            "/players/{id}",
            "/games",
            "/games/{id}/join",
            "/games/{id}/ready",
            "/games/{id}/rounds/{index}/choice",
            "/games/{id}/state",
            "/games/{id}/phase",
            "/games/{id}/events",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
