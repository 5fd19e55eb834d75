//! Interaction recording
//!
//! Views and joins are emit-and-forget: the recorder publishes a fact on an
//! in-process broadcast channel and returns without confirming anything to
//! the caller. Score recomputation listens to that stream and runs on its
//! own tasks; a slow or failing score update never slows down or fails the
//! content-view response that triggered it.
//!
//! The fact payload is never a data source for scoring. Recompute reads the
//! counters fresh from the stores: the view counter maintained here by
//! atomic increment, and the attendance rows owned by the external
//! attendance collaborator (which must have persisted the join before
//! `track_join` is called).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{InteractionEvent, InteractionKind};
use crate::score::refresh::ScoreRefreshService;
use crate::store::{Clock, EntityStore};

/// Buffered facts before slow listeners start lagging
const FACT_CHANNEL_CAPACITY: usize = 1024;

/// Records raw engagement signals and publishes them as facts
pub struct InteractionRecorder {
    entities: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    facts: broadcast::Sender<InteractionEvent>,
}

impl InteractionRecorder {
    pub fn new(entities: Arc<dyn EntityStore>, clock: Arc<dyn Clock>) -> Self {
        let (facts, _) = broadcast::channel(FACT_CHANNEL_CAPACITY);
        Self {
            entities,
            clock,
            facts,
        }
    }

    /// Subscribe to the fact stream (analytics, score refresh)
    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.facts.subscribe()
    }

    /// Record a content view: atomic view-counter increment, liveness touch,
    /// fact published. Store failures are logged and swallowed; a view
    /// response never fails because of recording.
    pub async fn track_view(&self, entity_id: Uuid, user_id: Option<Uuid>) {
        let now = self.clock.now();

        if let Err(e) = self.entities.increment_view_count(entity_id).await {
            warn!(entity_id = %entity_id, error = %e, "View count increment failed");
        }
        if let Err(e) = self.entities.touch_last_active(entity_id, now).await {
            debug!(entity_id = %entity_id, error = %e, "Liveness touch failed");
        }

        self.publish(InteractionEvent {
            entity_id,
            user_id,
            kind: InteractionKind::View,
            at: now,
        });
    }

    /// Record a join. Caller contract: the attendance row already exists in
    /// the attendance store, so the recompute this triggers reads it.
    pub async fn track_join(&self, entity_id: Uuid, user_id: Uuid) {
        let now = self.clock.now();

        if let Err(e) = self.entities.touch_last_active(entity_id, now).await {
            debug!(entity_id = %entity_id, error = %e, "Liveness touch failed");
        }

        self.publish(InteractionEvent {
            entity_id,
            user_id: Some(user_id),
            kind: InteractionKind::Join,
            at: now,
        });
    }

    fn publish(&self, event: InteractionEvent) {
        if self.facts.send(event).is_err() {
            debug!("No interaction listeners registered; fact dropped");
        }
    }
}

/// Spawn the listener that keeps trending scores in step with interactions.
///
/// For each fact: the cached score is invalidated (the counters just
/// changed, so the cached value is stale ahead of its TTL) and a detached
/// recompute is dispatched. Lagged facts are skipped with a warning; the
/// affected entities stay stale until their next interaction or the sweep.
pub fn spawn_refresh_listener(
    refresh: Arc<ScoreRefreshService>,
    mut facts: broadcast::Receiver<InteractionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match facts.recv().await {
                Ok(event) => {
                    debug!(
                        entity_id = %event.entity_id,
                        kind = ?event.kind,
                        "Interaction fact received; refreshing score"
                    );
                    refresh.mark_stale(event.entity_id).await;
                    refresh.refresh_detached(event.entity_id);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        missed = missed,
                        "Interaction listener lagged; skipped facts stay stale until sweep"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
