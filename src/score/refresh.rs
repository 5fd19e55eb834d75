//! On-demand trending score refresh
//!
//! The refresh engine owns every write to the authoritative trending score.
//! Two paths call into it:
//!
//! - the interaction path (view/join), which invalidates the cached score
//!   and dispatches a detached recompute that never blocks or fails the
//!   triggering request
//! - the scheduled sweep, which calls the force-recompute path directly so a
//!   warm cache cannot suppress the periodic authoritative write
//!
//! Concurrent recomputes of the same entity are allowed to race: both read
//! the counters fresh and the last write wins, which is a correct
//! approximation because the score is a pure function of the counters.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::score::cache::ScoreCache;
use crate::score::calculator::trending_score;
use crate::store::{Clock, EntityStore, RelationshipStore};
use crate::types::{PulseError, Result};

/// Tunables for the refresh engine
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// TTL for cached scores
    pub cache_ttl: Duration,
    /// Deadline for a single entity recompute; one hung entity must not
    /// stall a sweep batch
    pub entity_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            entity_timeout: Duration::from_secs(5),
        }
    }
}

/// Recomputes trending scores and writes them through to the authoritative
/// store and the cache
pub struct ScoreRefreshService {
    entities: Arc<dyn EntityStore>,
    relationships: Arc<dyn RelationshipStore>,
    cache: Arc<dyn ScoreCache>,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
}

impl ScoreRefreshService {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        relationships: Arc<dyn RelationshipStore>,
        cache: Arc<dyn ScoreCache>,
        clock: Arc<dyn Clock>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            entities,
            relationships,
            cache,
            clock,
            config,
        }
    }

    /// Read-through score lookup: cache hit returns the cached value, a miss
    /// recomputes and repopulates the cache.
    pub async fn update_trending_score(&self, entity_id: Uuid) -> Result<f64> {
        if let Some(score) = self.cache.get(entity_id).await {
            debug!(entity_id = %entity_id, score = score, "Trending score served from cache");
            return Ok(score);
        }
        self.refresh(entity_id).await
    }

    /// Force recompute from freshly-read counters, writing through to the
    /// store and the cache. Runs under the per-entity deadline.
    pub async fn refresh(&self, entity_id: Uuid) -> Result<f64> {
        match tokio::time::timeout(self.config.entity_timeout, self.refresh_inner(entity_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(PulseError::Timeout(self.config.entity_timeout)),
        }
    }

    async fn refresh_inner(&self, entity_id: Uuid) -> Result<f64> {
        let entity = self
            .entities
            .find_by_id(entity_id)
            .await?
            .ok_or_else(|| PulseError::NotFound(format!("entity {entity_id}")))?;

        // Counters are read fresh every time; a previously cached score is
        // never an input to recompute.
        let joins = self.relationships.attendance_count(entity_id).await?;
        let age = self.clock.now().signed_duration_since(entity.created_at);
        let age_hours = age.num_milliseconds().max(0) as f64 / 3_600_000.0;

        let score = trending_score(joins, entity.view_count, age_hours);

        self.entities.update_score(entity_id, score).await?;
        self.cache.set(entity_id, score, self.config.cache_ttl).await;

        debug!(
            entity_id = %entity_id,
            joins = joins,
            views = entity.view_count,
            age_hours = format!("{age_hours:.2}"),
            score = score,
            "Trending score recomputed"
        );
        Ok(score)
    }

    /// Drop the cached score for an entity whose counters just changed.
    ///
    /// A backend without delete support makes this a logged no-op; the stale
    /// value then survives until natural TTL expiry.
    pub async fn mark_stale(&self, entity_id: Uuid) {
        if !self.cache.invalidate(entity_id).await {
            warn!(
                entity_id = %entity_id,
                "Cache backend cannot invalidate; stale score persists until TTL expiry"
            );
        }
    }

    /// Dispatch a recompute on an independent task. The outcome is only
    /// observed through logging; the caller's control flow is unaffected.
    pub fn refresh_detached(self: &Arc<Self>, entity_id: Uuid) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.refresh(entity_id).await {
                warn!(entity_id = %entity_id, error = %e, "Detached score refresh failed");
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use crate::model::{EntityKind, Rankable};
    use crate::score::cache::MemoryScoreCache;
    use crate::store::{FixedClock, MemoryEntityStore, MemoryRelationshipStore};

    struct Fixture {
        entities: Arc<MemoryEntityStore>,
        relationships: Arc<MemoryRelationshipStore>,
        clock: Arc<FixedClock>,
        service: Arc<ScoreRefreshService>,
    }

    fn fixture() -> Fixture {
        let entities = Arc::new(MemoryEntityStore::new());
        let relationships = Arc::new(MemoryRelationshipStore::new());
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 6, 22, 0, 0).unwrap(),
        ));
        let service = Arc::new(ScoreRefreshService::new(
            entities.clone(),
            relationships.clone(),
            Arc::new(MemoryScoreCache::new()),
            clock.clone(),
            RefreshConfig::default(),
        ));
        Fixture {
            entities,
            relationships,
            clock,
            service,
        }
    }

    #[tokio::test]
    async fn test_refresh_unknown_entity_is_not_found() {
        let fx = fixture();
        let err = fx.service.refresh(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PulseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fresh_entity_with_one_join_one_view_scores_4_5() {
        let fx = fixture();
        let entity = Rankable::new(EntityKind::Plan, "Rooftop set", fx.clock.now());
        let id = entity.id;
        fx.entities.insert(entity).await.unwrap();

        fx.entities.increment_view_count(id).await.unwrap();
        fx.relationships.add_attendance(id, Uuid::new_v4());

        let score = fx.service.update_trending_score(id).await.unwrap();
        assert_eq!(score, 4.5);

        // Written through to the authoritative store
        let stored = fx.entities.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.trending_score, 4.5);
    }

    #[tokio::test]
    async fn test_score_decays_a_day_later() {
        let fx = fixture();
        let entity = Rankable::new(EntityKind::Plan, "Rooftop set", fx.clock.now());
        let id = entity.id;
        fx.entities.insert(entity).await.unwrap();
        fx.entities.increment_view_count(id).await.unwrap();
        fx.relationships.add_attendance(id, Uuid::new_v4());

        fx.clock.advance(ChronoDuration::hours(24));
        let score = fx.service.refresh(id).await.unwrap();
        assert!((score - 4.5 * (-1.2f64).exp()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache_without_store_write() {
        let fx = fixture();
        let entity = Rankable::new(EntityKind::Plan, "Basement show", fx.clock.now());
        let id = entity.id;
        fx.entities.insert(entity).await.unwrap();

        let first = fx.service.update_trending_score(id).await.unwrap();
        let writes_after_first = fx.entities.score_write_count();
        let second = fx.service.update_trending_score(id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.entities.score_write_count(), writes_after_first);
    }

    #[tokio::test]
    async fn test_mark_stale_forces_recompute_with_fresh_counters() {
        let fx = fixture();
        let entity = Rankable::new(EntityKind::Plan, "Block party", fx.clock.now());
        let id = entity.id;
        fx.entities.insert(entity).await.unwrap();

        let before = fx.service.update_trending_score(id).await.unwrap();
        assert_eq!(before, 0.0);

        fx.relationships.add_attendance(id, Uuid::new_v4());
        fx.service.mark_stale(id).await;

        let after = fx.service.update_trending_score(id).await.unwrap();
        assert_eq!(after, 3.0);
    }

    #[tokio::test]
    async fn test_refresh_times_out_on_hung_store() {
        use async_trait::async_trait;
        use chrono::{DateTime, Utc};

        use crate::store::{EntityStore, GeoFilter, TrendingFilter};

        // Entity store whose reads never complete
        struct HungStore;

        #[async_trait]
        impl EntityStore for HungStore {
            async fn find_by_id(&self, _id: Uuid) -> Result<Option<Rankable>> {
                futures::future::pending::<()>().await;
                Ok(None)
            }
            async fn insert(&self, _entity: Rankable) -> Result<()> {
                Ok(())
            }
            async fn update_score(&self, _id: Uuid, _score: f64) -> Result<()> {
                Ok(())
            }
            async fn increment_view_count(&self, _id: Uuid) -> Result<()> {
                Ok(())
            }
            async fn touch_last_active(&self, _id: Uuid, _at: DateTime<Utc>) -> Result<()> {
                Ok(())
            }
            async fn find_nearby(&self, _filter: &GeoFilter) -> Result<(Vec<Rankable>, u64)> {
                Ok((vec![], 0))
            }
            async fn find_trending(
                &self,
                _filter: &TrendingFilter,
            ) -> Result<(Vec<Rankable>, u64)> {
                Ok((vec![], 0))
            }
            async fn list_upcoming(
                &self,
                _now: DateTime<Utc>,
                _offset: u64,
                _limit: u64,
            ) -> Result<Vec<Rankable>> {
                Ok(vec![])
            }
        }

        let service = Arc::new(ScoreRefreshService::new(
            Arc::new(HungStore),
            Arc::new(MemoryRelationshipStore::new()),
            Arc::new(MemoryScoreCache::new()),
            Arc::new(crate::store::SystemClock),
            RefreshConfig {
                cache_ttl: Duration::from_secs(3600),
                entity_timeout: Duration::from_millis(20),
            },
        ));

        let err = service.refresh(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PulseError::Timeout(_)));
    }
}
