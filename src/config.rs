//! Application-level configuration loading: round timing, outbox dispatch, client sync,
//! scoring thresholds and the static content catalog.

use std::{collections::BTreeMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::{
    services::{content::ContentOption, scoring::ScoringConfig},
    state::state_machine::{Progression, RoundTiming},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_BACK_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Background outbox publisher settings.
pub struct DispatcherConfig {
    /// Fallback wake-up when no commit notification arrives.
    pub poll_interval: Duration,
    /// How long a claimed row stays reserved for this node.
    pub lease: Duration,
    /// Maximum rows claimed per pass.
    pub batch_size: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Delivery strategy a client session uses for its whole lifetime.
pub enum SyncMode {
    /// Fold pushed deliveries over an initial snapshot.
    Push,
    /// Replace the local state with a fresh snapshot on every tick.
    Poll,
}

#[derive(Debug, Clone)]
/// Client-side synchronization settings.
pub struct ClientConfig {
    /// Push or poll, fixed for the session.
    pub mode: SyncMode,
    /// Delay between snapshots in poll mode.
    pub poll_interval: Duration,
    /// Number of recent mutation ids remembered for deduplication.
    pub dedup_capacity: usize,
    /// Consecutive resync failures tolerated before the controller gives up.
    pub max_resync_attempts: u32,
    /// First delay after a failed resync; doubled on each further failure.
    pub initial_backoff: Duration,
    /// Upper bound for the resync delay.
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Push,
            poll_interval: Duration::from_millis(1_000),
            dedup_capacity: 1_024,
            max_resync_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Round timing and event batching used by ready transactions.
    pub progression: Progression,
    /// Outbox dispatcher tuning.
    pub dispatcher: DispatcherConfig,
    /// Defaults for client sessions.
    pub client: ClientConfig,
    /// Points table of the default scorer.
    pub scoring: ScoringConfig,
    /// Options per event slug served by the static content source.
    pub catalog: BTreeMap<String, Vec<ContentOption>>,
    /// Capacity of each per-game broadcast channel.
    pub hub_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            progression: Progression::default(),
            dispatcher: DispatcherConfig::default(),
            client: ClientConfig::default(),
            scoring: ScoringConfig::default(),
            catalog: BTreeMap::new(),
            hub_capacity: 256,
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        slugs = app_config.catalog.len(),
                        batch_events = app_config.progression.batch_events,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    round_lead_in_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    round_duration_ms: Option<Duration>,
    batch_events: Option<bool>,
    dispatcher: RawDispatcher,
    client: RawClient,
    scoring: RawScoring,
    hub_capacity: Option<usize>,
    catalog: BTreeMap<String, Vec<ContentOption>>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDispatcher {
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    poll_interval_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    lease_ms: Option<Duration>,
    batch_size: Option<u32>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawClient {
    mode: Option<RawSyncMode>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    poll_interval_ms: Option<Duration>,
    dedup_capacity: Option<usize>,
    max_resync_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawSyncMode {
    Push,
    Poll,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawScoring {
    exact_points: Option<f64>,
    partial_points: Option<f64>,
    probability_bands: Option<Vec<RawBand>>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single probability band.
struct RawBand {
    max_error: f64,
    points: f64,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let timing = RoundTiming {
            lead_in: value
                .round_lead_in_ms
                .unwrap_or(defaults.progression.timing.lead_in),
            round_duration: value
                .round_duration_ms
                .unwrap_or(defaults.progression.timing.round_duration),
        };
        let progression = Progression {
            timing,
            batch_events: value
                .batch_events
                .unwrap_or(defaults.progression.batch_events),
        };

        let dispatcher = DispatcherConfig {
            poll_interval: value
                .dispatcher
                .poll_interval_ms
                .unwrap_or(defaults.dispatcher.poll_interval),
            lease: value
                .dispatcher
                .lease_ms
                .unwrap_or(defaults.dispatcher.lease),
            batch_size: value
                .dispatcher
                .batch_size
                .unwrap_or(defaults.dispatcher.batch_size)
                .max(1),
        };

        let client = ClientConfig {
            mode: match value.client.mode {
                Some(RawSyncMode::Poll) => SyncMode::Poll,
                Some(RawSyncMode::Push) | None => defaults.client.mode,
            },
            poll_interval: value
                .client
                .poll_interval_ms
                .unwrap_or(defaults.client.poll_interval),
            dedup_capacity: value
                .client
                .dedup_capacity
                .unwrap_or(defaults.client.dedup_capacity),
            max_resync_attempts: value
                .client
                .max_resync_attempts
                .unwrap_or(defaults.client.max_resync_attempts),
            ..defaults.client
        };

        let scoring = ScoringConfig {
            exact_points: value
                .scoring
                .exact_points
                .unwrap_or(defaults.scoring.exact_points),
            partial_points: value
                .scoring
                .partial_points
                .unwrap_or(defaults.scoring.partial_points),
            probability_bands: value.scoring.probability_bands.map_or(
                defaults.scoring.probability_bands,
                |bands| bands.into_iter().map(|band| (band.max_error, band.points)).collect(),
            ),
        };

        Self {
            progression,
            dispatcher,
            client,
            scoring,
            catalog: value.catalog,
            hub_capacity: value.hub_capacity.unwrap_or(defaults.hub_capacity),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
