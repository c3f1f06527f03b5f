//! Turns a locked-in choice into a score delta.

use thiserror::Error;

use crate::{
    services::content::ContentOption,
    state::game::{Choice, ScoreDelta},
};

/// Awards points for a ranked choice by comparing it with the option signals.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Points for an option ranked at exactly its position.
    pub exact_points: f64,
    /// Points for an option in the top `k` but at another position.
    pub partial_points: f64,
    /// Probability bands, checked in order: `(max_error, points)`.
    pub probability_bands: Vec<(f64, f64)>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            exact_points: 1.0,
            partial_points: 0.5,
            probability_bands: vec![(0.05, 1.0), (0.15, 0.5)],
        }
    }
}

/// Why a choice could not be scored.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    /// The ranking is longer than the option list.
    #[error("ranked {chosen} options but the round only has {available}")]
    TooManyChoices {
        /// Length of the ranking.
        chosen: usize,
        /// Options the round offers.
        available: usize,
    },
    /// Estimates must lie in `[0, 1]`.
    #[error("probability {0} is outside [0, 1]")]
    ProbabilityOutOfRange(f64),
    /// The content source returned no options.
    #[error("round has no options")]
    NoOptions,
    /// The ranking lists the same option twice.
    #[error("option `{0}` is ranked more than once")]
    DuplicateOption(String),
}

/// Pure scoring rule.
pub trait Scorer: Send + Sync {
    /// Points per option id earned by `choice` against `options`.
    fn score(&self, options: &[ContentOption], choice: &Choice) -> Result<ScoreDelta, ScoreError>;
}

/// Scorer driven by [`ScoringConfig`].
#[derive(Debug, Clone, Default)]
pub struct DefaultScorer {
    config: ScoringConfig,
}

impl DefaultScorer {
    /// Scorer using the given points table.
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }
}

impl Scorer for DefaultScorer {
    fn score(&self, options: &[ContentOption], choice: &Choice) -> Result<ScoreDelta, ScoreError> {
        match choice {
            Choice::Ranked(ids) => self.score_ranking(options, ids),
            Choice::Probability(estimate) => self.score_probability(options, *estimate),
        }
    }
}

impl DefaultScorer {
    fn score_ranking(&self, options: &[ContentOption], ids: &[String]) -> Result<ScoreDelta, ScoreError> {
        if options.len() < ids.len() {
            return Err(ScoreError::TooManyChoices {
                chosen: ids.len(),
                available: options.len(),
            });
        }

        for (position, id) in ids.iter().enumerate() {
            if ids[..position].contains(id) {
                return Err(ScoreError::DuplicateOption(id.clone()));
            }
        }

        let mut ranked: Vec<&ContentOption> = options.iter().collect();
        ranked.sort_by(|a, b| b.signal.total_cmp(&a.signal));
        ranked.truncate(ids.len());

        Ok(ids
            .iter()
            .enumerate()
            .map(|(position, id)| {
                let points = if ranked[position].id == *id {
                    self.config.exact_points
                } else if ranked.iter().any(|option| option.id == *id) {
                    self.config.partial_points
                } else {
                    0.0
                };
                (id.clone(), points)
            })
            .collect())
    }

    fn score_probability(&self, options: &[ContentOption], estimate: f64) -> Result<ScoreDelta, ScoreError> {
        if !(0.0..=1.0).contains(&estimate) {
            return Err(ScoreError::ProbabilityOutOfRange(estimate));
        }
        let option = options.first().ok_or(ScoreError::NoOptions)?;
        let error = (estimate - option.signal).abs();
        let points = self
            .config
            .probability_bands
            .iter()
            .find(|(max_error, _)| error <= *max_error)
            .map_or(0.0, |(_, points)| *points);
        Ok(ScoreDelta::from([(option.id.clone(), points)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<ContentOption> {
        [("a", 0.2), ("b", 0.5), ("c", 0.1), ("d", 0.3)]
            .into_iter()
            .map(|(id, signal)| ContentOption {
                id: id.into(),
                label: id.to_uppercase(),
                signal,
            })
            .collect()
    }

    fn ranked(ids: &[&str]) -> Choice {
        Choice::Ranked(ids.iter().map(|id| id.to_string()).collect())
    }

    #[test]
    fn ranking_awards_exact_partial_and_miss() {
        let delta = DefaultScorer::default()
            .score(&options(), &ranked(&["b", "a", "c"]))
            .unwrap();
        // top 3 by signal: b, d, a
        assert_eq!(delta["b"], 1.0);
        assert_eq!(delta["a"], 0.5);
        assert_eq!(delta["c"], 0.0);
    }

    #[test]
    fn empty_ranking_scores_nothing() {
        let delta = DefaultScorer::default()
            .score(&options(), &Choice::timeout())
            .unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn ranking_longer_than_options_is_rejected() {
        let err = DefaultScorer::default()
            .score(&options()[..1], &ranked(&["a", "b"]))
            .unwrap_err();
        assert_eq!(
            err,
            ScoreError::TooManyChoices {
                chosen: 2,
                available: 1
            }
        );
    }

    #[test]
    fn repeated_option_in_ranking_is_rejected() {
        let err = DefaultScorer::default()
            .score(&options(), &ranked(&["b", "d", "b"]))
            .unwrap_err();
        assert_eq!(err, ScoreError::DuplicateOption("b".into()));
    }

    #[test]
    fn probability_uses_first_matching_band() {
        let scorer = DefaultScorer::default();
        let close = scorer.score(&options(), &Choice::Probability(0.23)).unwrap();
        assert_eq!(close["a"], 1.0);
        let near = scorer.score(&options(), &Choice::Probability(0.32)).unwrap();
        assert_eq!(near["a"], 0.5);
        let far = scorer.score(&options(), &Choice::Probability(0.9)).unwrap();
        assert_eq!(far["a"], 0.0);
    }

    #[test]
    fn probability_must_be_a_probability() {
        assert!(
            DefaultScorer::default()
                .score(&options(), &Choice::Probability(1.5))
                .is_err()
        );
    }
}
