//! Session-scoped synchronization of one game's state.
//!
//! A [`GameStateController`] owns a background task that keeps the latest
//! [`GameSnapshot`] in a watch channel, either by folding push deliveries or by
//! polling full snapshots. The mode is fixed for the whole session.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    client::{
        dedup::SeenMutations,
        merge::{MergeError, merge_delivery},
        round_timer::RoundTimer,
        transport::{DeliveryStream, SyncTransport, TransportError},
    },
    config::{ClientConfig, SyncMode},
    dto::sse::EventDelivery,
    state::game::{Choice, GamePhase, GameSnapshot, GameState},
};

/// Terminal failure of a controller session.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Too many resyncs failed in a row.
    #[error("gave up after {attempts} consecutive failed resyncs")]
    ResyncExhausted {
        /// Consecutive failures counted.
        attempts: u32,
        /// Last transport failure.
        #[source]
        source: TransportError,
    },
    /// The background task was cancelled or panicked.
    #[error("controller task aborted")]
    Aborted,
}

/// What happened to a single push delivery.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Folded into the local state.
    Applied,
    /// The mutation id was already applied.
    Duplicate,
    /// The sequence id is not newer than the local state.
    Stale,
    /// One or more deliveries are missing; local state must be rebuilt.
    Gap { expected: u64, received: u64 },
    /// The delivery could not be folded; local state must be rebuilt.
    Rejected(MergeError),
}

impl IngestOutcome {
    /// Whether local state can no longer be trusted.
    pub fn needs_resync(&self) -> bool {
        matches!(self, IngestOutcome::Gap { .. } | IngestOutcome::Rejected(_))
    }
}

/// Local state of a push session: last applied position and recent mutation ids.
#[derive(Debug)]
pub struct PushSession {
    snapshot: GameSnapshot,
    seen: SeenMutations,
    /// Deliveries still expected from the transaction being folded.
    group_remaining: u32,
}

impl PushSession {
    /// Start from a full snapshot, which is always a transaction boundary.
    pub fn new(snapshot: GameSnapshot, dedup_capacity: usize) -> Self {
        Self {
            snapshot,
            seen: SeenMutations::new(dedup_capacity),
            group_remaining: 0,
        }
    }

    /// Local state and its position.
    pub fn snapshot(&self) -> &GameSnapshot {
        &self.snapshot
    }

    /// Sequence id of the last applied delivery.
    pub fn last_sequence(&self) -> u64 {
        self.snapshot.sequence_id
    }

    /// Whether every delivery of the last applied transaction has been folded.
    /// Only settled snapshots are safe to show.
    pub fn is_settled(&self) -> bool {
        self.group_remaining == 0
    }

    /// Fold `delivery` if it is the next one in sequence.
    pub fn ingest(&mut self, delivery: &EventDelivery) -> IngestOutcome {
        if self.seen.contains(&delivery.mutation_id) {
            return IngestOutcome::Duplicate;
        }
        let last = self.snapshot.sequence_id;
        if delivery.sequence_id <= last {
            return IngestOutcome::Stale;
        }
        if delivery.sequence_id > last + 1 {
            return IngestOutcome::Gap {
                expected: last + 1,
                received: delivery.sequence_id,
            };
        }
        match merge_delivery(&self.snapshot.state, delivery) {
            Ok(state) => {
                self.snapshot = GameSnapshot {
                    state,
                    sequence_id: delivery.sequence_id,
                };
                self.seen.insert(&delivery.mutation_id);
                self.group_remaining = delivery.group_remaining;
                IngestOutcome::Applied
            }
            Err(err) => IngestOutcome::Rejected(err),
        }
    }
}

/// Handle to a running synchronization session.
///
/// Dropping the controller aborts its task, which drops the subscription and any
/// pending round timer.
pub struct GameStateController {
    game_id: String,
    state: watch::Receiver<Option<GameSnapshot>>,
    task: Option<JoinHandle<Result<(), ControllerError>>>,
}

impl GameStateController {
    /// Start syncing `game_id`. When `local_player` is set, that player's empty
    /// choice is submitted automatically once a round ends unanswered.
    pub fn start(
        transport: Arc<dyn SyncTransport>,
        game_id: impl Into<String>,
        local_player: Option<String>,
        config: ClientConfig,
    ) -> Self {
        let game_id = game_id.into();
        let (state_tx, state_rx) = watch::channel(None);
        let session = Session {
            transport,
            game_id: game_id.clone(),
            local_player,
            config,
            state_tx,
            timer: RoundTimer::new(),
        };
        let task = tokio::spawn(session.run());
        Self {
            game_id,
            state: state_rx,
            task: Some(task),
        }
    }

    /// Game being synchronized.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Latest known state, `None` until the first snapshot arrives.
    pub fn current(&self) -> Option<GameSnapshot> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<Option<GameSnapshot>> {
        self.state.clone()
    }

    /// Whether the background task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait for the session to end and report why.
    pub async fn finished(mut self) -> Result<(), ControllerError> {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(Err(ControllerError::Aborted)),
            None => Err(ControllerError::Aborted),
        }
    }
}

impl Drop for GameStateController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Session {
    transport: Arc<dyn SyncTransport>,
    game_id: String,
    local_player: Option<String>,
    config: ClientConfig,
    state_tx: watch::Sender<Option<GameSnapshot>>,
    timer: RoundTimer,
}

/// Consecutive-failure accounting with capped exponential backoff.
struct Retry {
    failures: u32,
    max_attempts: u32,
    delay: Duration,
    initial: Duration,
    max: Duration,
}

impl Retry {
    fn new(config: &ClientConfig) -> Self {
        Self {
            failures: 0,
            max_attempts: config.max_resync_attempts.max(1),
            delay: config.initial_backoff,
            initial: config.initial_backoff,
            max: config.max_backoff,
        }
    }

    fn succeeded(&mut self) {
        self.failures = 0;
        self.delay = self.initial;
    }

    async fn failed(&mut self, source: TransportError) -> Result<(), ControllerError> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return Err(ControllerError::ResyncExhausted {
                attempts: self.failures,
                source,
            });
        }
        warn!(attempt = self.failures, error = %source, "resync failed; backing off");
        sleep(self.delay).await;
        self.delay = (self.delay * 2).min(self.max);
        Ok(())
    }
}

impl Session {
    async fn run(mut self) -> Result<(), ControllerError> {
        info!(game_id = %self.game_id, mode = ?self.config.mode, "game sync started");
        match self.config.mode {
            SyncMode::Push => self.run_push().await,
            SyncMode::Poll => self.run_poll().await,
        }
    }

    async fn run_push(&mut self) -> Result<(), ControllerError> {
        let mut retry = Retry::new(&self.config);

        loop {
            let (mut deliveries, snapshot) = match self.resync().await {
                Ok(fresh) => {
                    retry.succeeded();
                    fresh
                }
                Err(err) => {
                    retry.failed(err).await?;
                    continue;
                }
            };

            let mut session = PushSession::new(snapshot, self.config.dedup_capacity);
            self.publish(session.snapshot().clone());

            while let Some(item) = deliveries.next().await {
                let delivery = match item {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        warn!(game_id = %self.game_id, error = %err, "push stream failed; resyncing");
                        break;
                    }
                };
                let outcome = session.ingest(&delivery);
                match &outcome {
                    IngestOutcome::Applied if session.is_settled() => {
                        self.publish(session.snapshot().clone())
                    }
                    IngestOutcome::Applied => {
                        debug!(sequence_id = delivery.sequence_id, "holding partial transaction");
                    }
                    IngestOutcome::Duplicate | IngestOutcome::Stale => {
                        debug!(sequence_id = delivery.sequence_id, ?outcome, "delivery dropped");
                    }
                    IngestOutcome::Gap { expected, received } => {
                        warn!(expected, received, "sequence gap; resyncing");
                    }
                    IngestOutcome::Rejected(err) => {
                        warn!(error = %err, sequence_id = delivery.sequence_id, "merge failed; resyncing");
                    }
                }
                if outcome.needs_resync() {
                    break;
                }
            }
        }
    }

    /// Subscribe first, then read the snapshot, so nothing committed in between is missed.
    async fn resync(&self) -> Result<(DeliveryStream, GameSnapshot), TransportError> {
        let deliveries = self.transport.subscribe(&self.game_id).await?;
        let snapshot = self.transport.fetch_snapshot(&self.game_id).await?;
        debug!(game_id = %self.game_id, sequence_id = snapshot.sequence_id, "snapshot fetched");
        Ok((deliveries, snapshot))
    }

    async fn run_poll(&mut self) -> Result<(), ControllerError> {
        let mut retry = Retry::new(&self.config);
        loop {
            match self.transport.fetch_snapshot(&self.game_id).await {
                Ok(snapshot) => {
                    retry.succeeded();
                    self.publish(snapshot);
                    sleep(self.config.poll_interval).await;
                }
                Err(err) => retry.failed(err).await?,
            }
        }
    }

    fn publish(&mut self, snapshot: GameSnapshot) {
        self.schedule_timeout(&snapshot.state);
        self.state_tx.send_replace(Some(snapshot));
    }

    /// Arm the automatic empty submission for the local player's unanswered round.
    fn schedule_timeout(&mut self, state: &GameState) {
        let Some(player_id) = self.local_player.clone() else {
            return;
        };
        if state.phase != GamePhase::InPlay {
            self.timer.cancel();
            return;
        }
        let Some(round) = state.current_round() else {
            return;
        };
        if state.has_answered(round.index, &player_id) {
            if self.timer.armed_round() == Some(round.index) {
                self.timer.cancel();
            }
            return;
        }
        let Some(end_time) = round.end_time else {
            return;
        };

        let transport = self.transport.clone();
        let game_id = self.game_id.clone();
        let round_index = round.index;
        self.timer.arm(round_index, end_time, move || async move {
            match transport
                .submit_choice(&game_id, round_index, &player_id, Choice::timeout())
                .await
            {
                Ok(()) => info!(%game_id, round_index, "submitted timeout choice"),
                Err(TransportError::Rejected(reason)) => {
                    debug!(%game_id, round_index, %reason, "timeout choice not needed")
                }
                Err(err) => warn!(%game_id, round_index, error = %err, "timeout submission failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use futures::future::BoxFuture;
    use time::macros::datetime;
    use tokio::sync::broadcast;
    use tokio_stream::wrappers::BroadcastStream;

    use super::*;
    use crate::{
        dao::models::pending_round,
        dto::events::{GameEvent, PlayerJoined},
        state::game::{PlayerReadiness, PlayerSnapshot},
    };

    fn lobby(sequence_id: u64, players: &[&str]) -> GameSnapshot {
        GameSnapshot {
            state: GameState {
                id: "g".into(),
                phase: GamePhase::Joinable,
                current_round_index: None,
                created_at: datetime!(2024-05-01 12:00 UTC),
                players: players
                    .iter()
                    .map(|id| PlayerSnapshot {
                        id: id.to_string(),
                        state: PlayerReadiness::NotReady,
                    })
                    .collect(),
                rounds: vec![pending_round(0, "a".into())],
            },
            sequence_id,
        }
    }

    fn joined(sequence_id: u64, player: &str) -> EventDelivery {
        let (name, payload) = GameEvent::PlayerJoined(PlayerJoined { id: player.into() })
            .into_parts()
            .unwrap();
        EventDelivery {
            event_name: name.into(),
            payload,
            mutation_id: format!("m{sequence_id}"),
            sequence_id,
            group_remaining: 0,
        }
    }

    #[test]
    fn ingest_classifies_deliveries() {
        let mut session = PushSession::new(lobby(1, &["p1"]), 16);
        assert!(matches!(session.ingest(&joined(2, "p2")), IngestOutcome::Applied));
        assert!(matches!(session.ingest(&joined(2, "p2")), IngestOutcome::Duplicate));

        let mut replayed = joined(1, "p0");
        replayed.mutation_id = "other".into();
        assert!(matches!(session.ingest(&replayed), IngestOutcome::Stale));

        let outcome = session.ingest(&joined(5, "p5"));
        assert!(matches!(outcome, IngestOutcome::Gap { expected: 3, received: 5 }));
        assert!(outcome.needs_resync());
        assert_eq!(session.last_sequence(), 2);
        assert_eq!(session.snapshot().state.players.len(), 2);
    }

    #[test]
    fn session_settles_at_transaction_end() {
        let mut session = PushSession::new(lobby(0, &[]), 16);
        assert!(session.is_settled());

        let mut first = joined(1, "p1");
        first.group_remaining = 1;
        assert!(matches!(session.ingest(&first), IngestOutcome::Applied));
        assert!(!session.is_settled());

        assert!(matches!(session.ingest(&joined(2, "p2")), IngestOutcome::Applied));
        assert!(session.is_settled());
        assert_eq!(session.snapshot().state.players.len(), 2);
    }

    #[tokio::test]
    async fn partial_transactions_are_not_published() {
        let transport = FakeTransport::new(lobby(0, &[]));
        let controller = GameStateController::start(
            transport.clone(),
            "g",
            None,
            fast_config(SyncMode::Push),
        );
        wait_for_sequence(&controller, 0).await;

        let mut first = joined(1, "p1");
        first.group_remaining = 1;
        transport.live.send(first).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.current().unwrap().sequence_id, 0);

        transport.live.send(joined(2, "p2")).unwrap();
        let snapshot = wait_for_sequence(&controller, 2).await;
        assert_eq!(snapshot.state.players.len(), 2);
    }

    #[test]
    fn undecodable_delivery_requests_resync() {
        let mut session = PushSession::new(lobby(0, &[]), 16);
        let mut delivery = joined(1, "p1");
        delivery.event_name = "gameDeleted".into();
        let outcome = session.ingest(&delivery);
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
        assert_eq!(session.last_sequence(), 0);
    }

    struct FakeTransport {
        snapshot: Mutex<GameSnapshot>,
        live: broadcast::Sender<EventDelivery>,
        fetches: AtomicU32,
        failing: AtomicU32,
    }

    impl FakeTransport {
        fn new(snapshot: GameSnapshot) -> Arc<Self> {
            let (live, _) = broadcast::channel(16);
            Arc::new(Self {
                snapshot: Mutex::new(snapshot),
                live,
                fetches: AtomicU32::new(0),
                failing: AtomicU32::new(0),
            })
        }
    }

    impl SyncTransport for FakeTransport {
        fn fetch_snapshot(&self, _game_id: &str) -> BoxFuture<'static, Result<GameSnapshot, TransportError>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let result = if self.failing.load(Ordering::SeqCst) > 0 {
                Err(TransportError::Unavailable("down".into()))
            } else {
                Ok(self.snapshot.lock().unwrap().clone())
            };
            Box::pin(async move { result })
        }

        fn subscribe(&self, _game_id: &str) -> BoxFuture<'static, Result<DeliveryStream, TransportError>> {
            let stream = BroadcastStream::new(self.live.subscribe())
                .map(|item| item.map_err(|_| TransportError::Lagged(1)));
            Box::pin(async move { Ok(Box::pin(stream) as DeliveryStream) })
        }

        fn submit_choice(
            &self,
            _game_id: &str,
            _round_index: u32,
            _player_id: &str,
            _choice: Choice,
        ) -> BoxFuture<'static, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn fast_config(mode: SyncMode) -> ClientConfig {
        ClientConfig {
            mode,
            poll_interval: Duration::from_millis(10),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            max_resync_attempts: 3,
            ..ClientConfig::default()
        }
    }

    async fn wait_for_sequence(controller: &GameStateController, sequence_id: u64) -> GameSnapshot {
        let mut watcher = controller.watch();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            watcher.wait_for(|current| current.as_ref().is_some_and(|s| s.sequence_id == sequence_id)),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        snapshot.unwrap()
    }

    #[tokio::test]
    async fn gap_triggers_resync_from_fresh_snapshot() {
        let transport = FakeTransport::new(lobby(1, &["p1"]));
        let controller = GameStateController::start(
            transport.clone(),
            "g",
            None,
            fast_config(SyncMode::Push),
        );
        wait_for_sequence(&controller, 1).await;

        *transport.snapshot.lock().unwrap() = lobby(3, &["p1", "p2", "p3"]);
        transport.live.send(joined(3, "p3")).unwrap();

        let snapshot = wait_for_sequence(&controller, 3).await;
        assert_eq!(snapshot.state.players.len(), 3);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_consecutive_failures() {
        let transport = FakeTransport::new(lobby(0, &[]));
        transport.failing.store(1, Ordering::SeqCst);
        let controller = GameStateController::start(
            transport.clone(),
            "g",
            None,
            fast_config(SyncMode::Push),
        );
        let result = tokio::time::timeout(Duration::from_secs(5), controller.finished())
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(ControllerError::ResyncExhausted { attempts: 3, .. })
        ));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_mode_replaces_state() {
        let transport = FakeTransport::new(lobby(0, &[]));
        let controller = GameStateController::start(
            transport.clone(),
            "g",
            None,
            fast_config(SyncMode::Poll),
        );
        wait_for_sequence(&controller, 0).await;

        *transport.snapshot.lock().unwrap() = lobby(4, &["p1"]);
        let snapshot = wait_for_sequence(&controller, 4).await;
        assert_eq!(snapshot.state.players.len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_controller_unsubscribes() {
        let transport = FakeTransport::new(lobby(0, &[]));
        let controller = GameStateController::start(
            transport.clone(),
            "g",
            None,
            fast_config(SyncMode::Push),
        );
        wait_for_sequence(&controller, 0).await;
        assert_eq!(transport.live.receiver_count(), 1);

        drop(controller);
        for _ in 0..100 {
            if transport.live.receiver_count() == 0 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.live.receiver_count(), 0);
    }
}
