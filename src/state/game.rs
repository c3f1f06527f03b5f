use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Points awarded per option id for a single locked-in choice.
pub type ScoreDelta = BTreeMap<String, f64>;

/// Lifecycle phase of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Lobby: players may join and ready up.
    Joinable,
    /// A round is active (`current_round_index` is set).
    InPlay,
    /// Terminal phase.
    Ended,
}

impl GamePhase {
    /// Stable storage/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            GamePhase::Joinable => "joinable",
            GamePhase::InPlay => "in_play",
            GamePhase::Ended => "ended",
        }
    }

    /// Parse the storage representation produced by [`GamePhase::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "joinable" => Some(GamePhase::Joinable),
            "in_play" => Some(GamePhase::InPlay),
            "ended" => Some(GamePhase::Ended),
            _ => None,
        }
    }
}

/// Ready state of a game member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlayerReadiness {
    /// The player asked to move on.
    Ready,
    /// Default state after joining and after every advancement.
    NotReady,
}

impl PlayerReadiness {
    /// Stable storage/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerReadiness::Ready => "ready",
            PlayerReadiness::NotReady => "not_ready",
        }
    }

    /// Parse the storage representation produced by [`PlayerReadiness::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ready" => Some(PlayerReadiness::Ready),
            "not_ready" => Some(PlayerReadiness::NotReady),
            _ => None,
        }
    }
}

/// Raw answer a player locks in for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Choice {
    /// Option ids ordered from most to least likely. Empty when the round timed out.
    Ranked(Vec<String>),
    /// Probability estimate in `[0, 1]` for single-option rounds.
    Probability(f64),
}

impl Choice {
    /// Choice submitted on a player's behalf when the round timer fires.
    pub fn timeout() -> Self {
        Choice::Ranked(Vec::new())
    }

    /// Whether this is the automatic empty submission.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Choice::Ranked(ids) if ids.is_empty())
    }
}

/// Membership of a player in a game as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlayerSnapshot {
    /// Player identifier.
    pub id: String,
    /// Readiness for the next advancement.
    pub state: PlayerReadiness,
}

/// A locked-in answer together with its computed score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoundChoice {
    /// Answering member.
    pub player_id: String,
    /// Round answered.
    pub round_index: u32,
    /// The answer itself.
    pub choice: Choice,
    /// Points per option id, fixed at submission.
    #[schema(value_type = BTreeMap<String, f64>)]
    pub score_delta: ScoreDelta,
}

/// One round with its schedule and the choices recorded so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoundState {
    /// Position in the game, starting at 0.
    pub index: u32,
    /// Reference to the external content this round asks about.
    pub event_slug: String,
    /// Set when the round is activated.
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub start_time: Option<OffsetDateTime>,
    /// Deadline for choices; set together with `start_time`.
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub end_time: Option<OffsetDateTime>,
    /// At most one per member.
    pub choices: Vec<RoundChoice>,
}

impl RoundState {
    /// Whether the round has been activated.
    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    /// Choice recorded for `player_id`, if any.
    pub fn choice_of(&self, player_id: &str) -> Option<&RoundChoice> {
        self.choices.iter().find(|choice| choice.player_id == player_id)
    }
}

/// Client-visible projection of a game, produced by snapshots and by folding events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GameState {
    /// Game identifier.
    pub id: String,
    /// Lifecycle phase.
    pub phase: GamePhase,
    /// Open round; present exactly while in play.
    pub current_round_index: Option<u32>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    /// Members in join order.
    pub players: Vec<PlayerSnapshot>,
    /// Every round, in play order.
    pub rounds: Vec<RoundState>,
}

impl GameState {
    /// Round currently being played, if any.
    pub fn current_round(&self) -> Option<&RoundState> {
        let index = self.current_round_index?;
        self.rounds.iter().find(|round| round.index == index)
    }

    /// Member record for `player_id`.
    pub fn player(&self, player_id: &str) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|player| player.id == player_id)
    }

    /// Sum of every score delta the player earned across all rounds.
    pub fn player_score(&self, player_id: &str) -> f64 {
        self.rounds
            .iter()
            .flat_map(|round| round.choices.iter())
            .filter(|choice| choice.player_id == player_id)
            .flat_map(|choice| choice.score_delta.values())
            .sum()
    }

    /// Whether `player_id` has locked in a choice for round `round_index`.
    pub fn has_answered(&self, round_index: u32, player_id: &str) -> bool {
        self.rounds
            .iter()
            .find(|round| round.index == round_index)
            .is_some_and(|round| round.choice_of(player_id).is_some())
    }

    /// Whether every member has answered the current round.
    pub fn all_players_locked(&self) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        self.players
            .iter()
            .all(|player| round.choice_of(&player.id).is_some())
    }

    /// Check the structural invariants that every committed state must satisfy.
    pub fn invariants_hold(&self) -> bool {
        let index_matches_phase =
            (self.phase == GamePhase::InPlay) == self.current_round_index.is_some();
        let times_paired = self
            .rounds
            .iter()
            .all(|round| round.start_time.is_some() == round.end_time.is_some());
        index_matches_phase && times_paired
    }
}

/// Full snapshot plus the log position it reflects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GameSnapshot {
    /// Game state at `sequence_id`.
    pub state: GameState,
    /// Highest sequence id appended to the game's channel (0 when empty).
    pub sequence_id: u64,
}

/// Allocate a fresh collision-resistant identifier.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current UTC time truncated to whole milliseconds so it survives every encoding unchanged.
pub fn now_millis() -> OffsetDateTime {
    truncate_to_millis(OffsetDateTime::now_utc())
}

/// Drop sub-millisecond precision from `value`.
pub fn truncate_to_millis(value: OffsetDateTime) -> OffsetDateTime {
    let millis = value.unix_timestamp_nanos() / 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000).unwrap_or(value)
}

/// Unix milliseconds used by relational storage.
pub fn to_unix_millis(value: OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Inverse of [`to_unix_millis`].
pub fn from_unix_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(index: u32, choices: Vec<RoundChoice>) -> RoundState {
        RoundState {
            index,
            event_slug: format!("slug-{index}"),
            start_time: None,
            end_time: None,
            choices,
        }
    }

    fn choice(player: &str, round_index: u32, deltas: &[(&str, f64)]) -> RoundChoice {
        RoundChoice {
            player_id: player.into(),
            round_index,
            choice: Choice::timeout(),
            score_delta: deltas.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn game() -> GameState {
        GameState {
            id: "g".into(),
            phase: GamePhase::InPlay,
            current_round_index: Some(1),
            created_at: now_millis(),
            players: vec![
                PlayerSnapshot {
                    id: "a".into(),
                    state: PlayerReadiness::NotReady,
                },
                PlayerSnapshot {
                    id: "b".into(),
                    state: PlayerReadiness::Ready,
                },
            ],
            rounds: vec![
                round(0, vec![choice("a", 0, &[("x", 1.0), ("y", 0.5)])]),
                round(1, vec![choice("a", 1, &[("z", 0.5)]), choice("b", 1, &[])]),
            ],
        }
    }

    #[test]
    fn player_score_sums_all_rounds() {
        let game = game();
        assert_eq!(game.player_score("a"), 2.0);
        assert_eq!(game.player_score("b"), 0.0);
        assert_eq!(game.player_score("missing"), 0.0);
    }

    #[test]
    fn all_players_locked_tracks_current_round() {
        let mut game = game();
        assert!(game.all_players_locked());
        game.current_round_index = Some(0);
        assert!(!game.all_players_locked());
        assert!(game.has_answered(0, "a"));
        assert!(!game.has_answered(0, "b"));
    }

    #[test]
    fn invariants_detect_index_without_play() {
        let mut game = game();
        assert!(game.invariants_hold());
        game.phase = GamePhase::Ended;
        assert!(!game.invariants_hold());
    }

    #[test]
    fn millis_round_trip_is_exact() {
        let now = now_millis();
        assert_eq!(from_unix_millis(to_unix_millis(now)), Some(now));
    }

    #[test]
    fn timeout_choice_is_empty_ranking() {
        assert!(Choice::timeout().is_timeout());
        assert!(!Choice::Probability(0.4).is_timeout());
    }
}
