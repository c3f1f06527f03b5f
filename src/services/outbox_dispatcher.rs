//! Background publisher draining the outbox into the per-game broadcast hubs.
//!
//! Each process runs one dispatcher under its own node id. Rows are leased before
//! being published so a crashed node's claims expire and get picked up elsewhere.

use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::DispatcherConfig,
    dao::storage::StoreResult,
    state::{SharedState, game::new_id},
};

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Claims, publishes and acknowledges outbox rows.
pub struct OutboxDispatcher {
    state: SharedState,
    node_id: String,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    /// Dispatcher with a fresh node id and the configured batch settings.
    pub fn new(state: SharedState) -> Self {
        let config = state.config().dispatcher.clone();
        Self {
            state,
            node_id: new_id(),
            config,
        }
    }

    /// Identifier this dispatcher leases rows under.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Run one claim/publish/acknowledge pass. Returns how many rows were published.
    ///
    /// Rows are published in `id` order. Without a store installed this is a no-op.
    pub async fn dispatch_once(&self) -> StoreResult<usize> {
        let Some(store) = self.state.game_store().await else {
            return Ok(0);
        };
        let records = store
            .claim_outbox(
                self.node_id.clone(),
                self.config.lease,
                self.config.batch_size,
            )
            .await?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            let receivers = self.state.hubs().publish(&record.channel, record.delivery());
            debug!(
                channel = %record.channel,
                sequence_id = record.sequence_id,
                name = %record.name,
                receivers,
                "outbox row published"
            );
            ids.push(record.id);
        }
        store.mark_processed(ids).await?;
        Ok(records.len())
    }

    /// Drain the outbox until `shutdown` resolves, then release this node's leases.
    pub async fn run<S>(self, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(node_id = %self.node_id, "outbox dispatcher started");
        let mut backoff = self.config.poll_interval;

        loop {
            match self.dispatch_once().await {
                Ok(published) => {
                    backoff = self.config.poll_interval;
                    if published as u32 >= self.config.batch_size {
                        continue;
                    }
                    let pruned = self.state.hubs().prune_idle();
                    if pruned > 0 {
                        debug!(pruned, "dropped idle channel hubs");
                    }
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = self.state.outbox_notified() => {}
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, retry_in_ms = backoff.as_millis() as u64, "outbox dispatch failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        if let Some(store) = self.state.game_store().await {
            match store.release_claims(self.node_id.clone()).await {
                Ok(released) => info!(node_id = %self.node_id, released, "outbox dispatcher stopped"),
                Err(err) => warn!(error = %err, "failed to release outbox claims"),
            }
        }
    }
}
