use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::mutations::{JoinOutcome, ReadyOutcome},
    state::game::{Choice, GamePhase, ScoreDelta},
};

/// Number of rounds drawn from the catalog when no slugs are given.
pub const DEFAULT_ROUND_COUNT: u32 = 3;

/// Payload used to create a new game.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct CreateGameRequest {
    /// Explicit content references, one round each. Drawn from the catalog when omitted.
    #[serde(default)]
    #[validate(length(min = 1, max = 50))]
    pub event_slugs: Option<Vec<String>>,
    /// Rounds to draw when `event_slugs` is omitted.
    #[serde(default)]
    #[validate(range(min = 1, max = 50))]
    pub round_count: Option<u32>,
}

/// Identifier and shape of a freshly created game.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GameCreated {
    /// Identifier of the new game.
    pub game_id: String,
    /// Content reference of each round, in play order.
    pub event_slugs: Vec<String>,
}

/// Player acting on a game (join or ready).
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct PlayerActionRequest {
    /// Acting player.
    #[validate(custom(function = "crate::dto::validation::validate_entity_id"))]
    pub player_id: String,
}

/// Result of a join request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JoinResponse {
    /// False when the player was already a member.
    pub joined: bool,
}

impl From<JoinOutcome> for JoinResponse {
    fn from(value: JoinOutcome) -> Self {
        Self {
            joined: value == JoinOutcome::Joined,
        }
    }
}

/// Result of a ready request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadyResponse {
    /// False when the player was already ready.
    pub changed: bool,
    /// Whether this ready-up advanced the game.
    pub advanced: bool,
    /// Phase after the request.
    pub phase: GamePhase,
}

impl From<ReadyOutcome> for ReadyResponse {
    fn from(value: ReadyOutcome) -> Self {
        Self {
            changed: value.changed,
            advanced: value.advanced,
            phase: value.phase,
        }
    }
}

/// A player's answer for a round.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct SubmitChoiceRequest {
    /// Answering member.
    #[validate(custom(function = "crate::dto::validation::validate_entity_id"))]
    pub player_id: String,
    /// Ranking or probability estimate.
    pub choice: Choice,
}

/// Points awarded for an accepted choice.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChoiceAccepted {
    /// Points per option id.
    #[schema(value_type = std::collections::BTreeMap<String, f64>)]
    pub score_delta: ScoreDelta,
}

/// Phase of a game without the rest of its state.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PhaseResponse {
    /// Current phase.
    pub phase: GamePhase,
    /// Whether new players may still join.
    pub joinable: bool,
}

impl From<GamePhase> for PhaseResponse {
    fn from(phase: GamePhase) -> Self {
        Self {
            phase,
            joinable: phase == GamePhase::Joinable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_rejects_empty_slug_list() {
        let request = CreateGameRequest {
            event_slugs: Some(Vec::new()),
            round_count: None,
        };
        assert!(request.validate().is_err());
        assert!(CreateGameRequest::default().validate().is_ok());
    }

    #[test]
    fn action_requires_backend_id() {
        let request = PlayerActionRequest {
            player_id: "bob".into(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn choice_request_parses_both_shapes() {
        let ranked: SubmitChoiceRequest = serde_json::from_str(
            r#"{"player_id":"0f1e2d3c4b5a69788796a5b4c3d2e1f0","choice":{"kind":"ranked","value":["a","b"]}}"#,
        )
        .unwrap();
        assert_eq!(ranked.choice, Choice::Ranked(vec!["a".into(), "b".into()]));

        let probability: SubmitChoiceRequest = serde_json::from_str(
            r#"{"player_id":"0f1e2d3c4b5a69788796a5b4c3d2e1f0","choice":{"kind":"probability","value":0.3}}"#,
        )
        .unwrap();
        assert_eq!(probability.choice, Choice::Probability(0.3));
    }

    #[test]
    fn phase_response_flags_lobby() {
        assert!(PhaseResponse::from(GamePhase::Joinable).joinable);
        assert!(!PhaseResponse::from(GamePhase::Ended).joinable);
    }
}
