//! Nearby and trending discovery queries
//!
//! Validates input before any I/O, resolves the requester's exclusion set
//! fresh, pushes the geo-radius and exclusion predicates down to the entity
//! store, and annotates each hit with its display distance. A discovery
//! request always returns a (possibly empty) page; a stale or missing
//! trending score only affects ranking, never inclusion.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::discovery::exclusion::ExclusionResolver;
use crate::discovery::geo::{display_km, distance_meters};
use crate::model::{EntityKind, Position, Rankable};
use crate::store::{Clock, EntityStore, GeoFilter, NearbyOrder, TrendingFilter};
use crate::types::{PulseError, Result};

/// Tunables for discovery queries
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub default_limit: u64,
    pub max_limit: u64,
    /// Liveness window applied when a nearby query asks for active entities
    /// without giving its own window
    pub default_active_window_min: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
            default_active_window_min: 60,
        }
    }
}

/// A nearby query as received from the API layer
#[derive(Debug, Clone)]
pub struct NearbyQuery {
    pub origin: Position,
    pub radius_km: f64,
    /// Restrict to entities with recent liveness
    pub active_only: bool,
    /// Liveness window in minutes; defaults from [`DiscoveryConfig`]
    pub active_within_min: Option<i64>,
    /// Empty means all kinds
    pub kinds: Vec<EntityKind>,
    pub order: NearbyOrder,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl NearbyQuery {
    pub fn at(origin: Position, radius_km: f64) -> Self {
        Self {
            origin,
            radius_km,
            active_only: false,
            active_within_min: None,
            kinds: Vec::new(),
            order: NearbyOrder::Distance,
            limit: None,
            offset: 0,
        }
    }
}

/// Optional geo restriction on a trending query
#[derive(Debug, Clone, Copy)]
pub struct GeoScope {
    pub origin: Position,
    pub radius_km: f64,
}

/// A trending query as received from the API layer
#[derive(Debug, Clone, Default)]
pub struct TrendingQuery {
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
    pub near: Option<GeoScope>,
    /// Empty means all kinds
    pub kinds: Vec<EntityKind>,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// One discovery result with its display distance.
///
/// Distance is present whenever the query had an origin (always, for nearby
/// queries), in kilometers rounded to one decimal.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryHit {
    pub entity: Rankable,
    pub distance_km: Option<f64>,
}

/// A page of discovery results
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPage {
    pub hits: Vec<DiscoveryHit>,
    /// Count of all entities matching the filter, ignoring pagination
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// Answers nearby and trending queries over the entity store
pub struct DiscoveryService {
    entities: Arc<dyn EntityStore>,
    exclusions: ExclusionResolver,
    clock: Arc<dyn Clock>,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        exclusions: ExclusionResolver,
        clock: Arc<dyn Clock>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            entities,
            exclusions,
            clock,
            config,
        }
    }

    /// Entities near an origin point, blocked relationships and the
    /// requester excluded, nearest first (or by score on request).
    pub async fn find_nearby(&self, requester: Uuid, query: &NearbyQuery) -> Result<DiscoveryPage> {
        query.origin.validate()?;
        Self::validate_radius(query.radius_km)?;
        let limit = self.resolve_limit(query.limit)?;

        let excluded = self.exclusions.resolve(requester).await?;

        let active_since = if query.active_only {
            let window = query
                .active_within_min
                .unwrap_or(self.config.default_active_window_min);
            Some(self.clock.now() - ChronoDuration::minutes(window))
        } else {
            None
        };

        let filter = GeoFilter {
            origin: query.origin,
            radius_m: query.radius_km * 1000.0,
            exclude_ids: excluded,
            kinds: query.kinds.clone(),
            active_since,
            order: query.order,
            limit,
            offset: query.offset,
        };

        let (entities, total) = self.entities.find_nearby(&filter).await?;
        let hits = annotate(entities, Some(&query.origin));

        debug!(
            requester = %requester,
            radius_km = query.radius_km,
            returned = hits.len(),
            total = total,
            "Nearby query served"
        );
        Ok(DiscoveryPage {
            hits,
            total,
            limit,
            offset: query.offset,
        })
    }

    /// Top entities by trending score, optionally windowed by start date and
    /// restricted to a geo radius.
    pub async fn find_trending(&self, query: &TrendingQuery) -> Result<DiscoveryPage> {
        if let Some(scope) = &query.near {
            scope.origin.validate()?;
            Self::validate_radius(scope.radius_km)?;
        }
        let limit = self.resolve_limit(query.limit)?;

        let filter = TrendingFilter {
            starts_after: query.starts_after,
            starts_before: query.starts_before,
            scope: query
                .near
                .map(|scope| (scope.origin, scope.radius_km * 1000.0)),
            kinds: query.kinds.clone(),
            limit,
            offset: query.offset,
        };

        let (entities, total) = self.entities.find_trending(&filter).await?;
        let origin = query.near.map(|scope| scope.origin);
        let hits = annotate(entities, origin.as_ref());

        debug!(
            returned = hits.len(),
            total = total,
            "Trending query served"
        );
        Ok(DiscoveryPage {
            hits,
            total,
            limit,
            offset: query.offset,
        })
    }

    fn validate_radius(radius_km: f64) -> Result<()> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(PulseError::InvalidArgument(format!(
                "radius must be a positive number of kilometers, got {radius_km}"
            )));
        }
        Ok(())
    }

    fn resolve_limit(&self, limit: Option<u64>) -> Result<u64> {
        let limit = limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(PulseError::InvalidArgument(format!(
                "limit must be between 1 and {}, got {limit}",
                self.config.max_limit
            )));
        }
        Ok(limit)
    }
}

/// Attach display distances to a result page
fn annotate(entities: Vec<Rankable>, origin: Option<&Position>) -> Vec<DiscoveryHit> {
    entities
        .into_iter()
        .map(|entity| {
            let distance_km = match (origin, &entity.position) {
                (Some(origin), Some(position)) => {
                    Some(display_km(distance_meters(origin, position)))
                }
                _ => None,
            };
            DiscoveryHit {
                entity,
                distance_km,
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    use crate::store::{FixedClock, MemoryEntityStore, MemoryRelationshipStore};

    struct Fixture {
        entities: Arc<MemoryEntityStore>,
        relationships: Arc<MemoryRelationshipStore>,
        clock: Arc<FixedClock>,
        service: DiscoveryService,
    }

    fn fixture() -> Fixture {
        let entities = Arc::new(MemoryEntityStore::new());
        let relationships = Arc::new(MemoryRelationshipStore::new());
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 6, 23, 0, 0).unwrap(),
        ));
        let service = DiscoveryService::new(
            entities.clone(),
            ExclusionResolver::new(relationships.clone()),
            clock.clone(),
            DiscoveryConfig::default(),
        );
        Fixture {
            entities,
            relationships,
            clock,
            service,
        }
    }

    // Downtown Minneapolis and offsets of roughly 1.1 km per 0.01 deg lat
    const ORIGIN: Position = Position {
        lat: 44.9778,
        lon: -93.2650,
    };

    async fn seed_member(fx: &Fixture, lat: f64, lon: f64) -> Uuid {
        let entity = Rankable::new(EntityKind::Member, "member", fx.clock.now())
            .with_position(Position::new(lat, lon));
        let id = entity.id;
        fx.entities.insert(entity).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_nan_coordinates_rejected_before_query() {
        let fx = fixture();
        let query = NearbyQuery::at(Position::new(f64::NAN, 0.0), 5.0);
        let err = fx
            .service
            .find_nearby(Uuid::new_v4(), &query)
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_nonsense_radius_and_limit_rejected() {
        let fx = fixture();
        let requester = Uuid::new_v4();

        let bad_radius = NearbyQuery::at(ORIGIN, -2.0);
        assert!(matches!(
            fx.service.find_nearby(requester, &bad_radius).await,
            Err(PulseError::InvalidArgument(_))
        ));

        let mut bad_limit = NearbyQuery::at(ORIGIN, 5.0);
        bad_limit.limit = Some(0);
        assert!(matches!(
            fx.service.find_nearby(requester, &bad_limit).await,
            Err(PulseError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_nearest_first_with_distances() {
        let fx = fixture();
        let near = seed_member(&fx, 44.9800, -93.2650).await;
        let far = seed_member(&fx, 45.0200, -93.2650).await;
        seed_member(&fx, 46.0, -93.2650).await; // outside radius

        let page = fx
            .service
            .find_nearby(Uuid::new_v4(), &NearbyQuery::at(ORIGIN, 10.0))
            .await
            .unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.hits[0].entity.id, near);
        assert_eq!(page.hits[1].entity.id, far);
        let d0 = page.hits[0].distance_km.unwrap();
        let d1 = page.hits[1].distance_km.unwrap();
        assert!(d0 < d1);
        assert!(d0 >= 0.0);
    }

    #[tokio::test]
    async fn test_entity_at_origin_has_distance_zero() {
        let fx = fixture();
        seed_member(&fx, ORIGIN.lat, ORIGIN.lon).await;

        let page = fx
            .service
            .find_nearby(Uuid::new_v4(), &NearbyQuery::at(ORIGIN, 1.0))
            .await
            .unwrap();
        assert_eq!(page.hits[0].distance_km, Some(0.0));
    }

    #[tokio::test]
    async fn test_blocked_user_excluded_from_results_and_total() {
        let fx = fixture();
        let requester = Uuid::new_v4();

        let blocked = seed_member(&fx, 44.9790, -93.2650).await;
        let visible = seed_member(&fx, 44.9810, -93.2650).await;
        fx.relationships.add_block(requester, blocked);

        let page = fx
            .service
            .find_nearby(requester, &NearbyQuery::at(ORIGIN, 10.0))
            .await
            .unwrap();

        assert_eq!(page.total, 1);
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].entity.id, visible);
    }

    #[tokio::test]
    async fn test_blocker_is_also_hidden_from_requester() {
        let fx = fixture();
        let requester = Uuid::new_v4();

        let blocker = seed_member(&fx, 44.9790, -93.2650).await;
        fx.relationships.add_block(blocker, requester);

        let page = fx
            .service
            .find_nearby(requester, &NearbyQuery::at(ORIGIN, 10.0))
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.hits.is_empty());
    }

    #[tokio::test]
    async fn test_requester_never_sees_themself() {
        let fx = fixture();
        let requester = seed_member(&fx, ORIGIN.lat, ORIGIN.lon).await;
        let other = seed_member(&fx, 44.9790, -93.2650).await;

        let page = fx
            .service
            .find_nearby(requester, &NearbyQuery::at(ORIGIN, 10.0))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].entity.id, other);
    }

    #[tokio::test]
    async fn test_active_only_applies_liveness_window() {
        let fx = fixture();
        let fresh = seed_member(&fx, 44.9790, -93.2650).await;
        let stale = seed_member(&fx, 44.9800, -93.2650).await;
        fx.entities
            .touch_last_active(stale, fx.clock.now() - ChronoDuration::hours(3))
            .await
            .unwrap();

        let mut query = NearbyQuery::at(ORIGIN, 10.0);
        query.active_only = true;

        let page = fx
            .service
            .find_nearby(Uuid::new_v4(), &query)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].entity.id, fresh);
    }

    #[tokio::test]
    async fn test_pagination_returns_total_across_pages() {
        let fx = fixture();
        for i in 0..5 {
            seed_member(&fx, 44.9780 + f64::from(i) * 0.001, -93.2650).await;
        }

        let mut query = NearbyQuery::at(ORIGIN, 10.0);
        query.limit = Some(2);
        query.offset = 2;

        let page = fx
            .service
            .find_nearby(Uuid::new_v4(), &query)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.hits.len(), 2);
    }

    #[tokio::test]
    async fn test_score_ordering_keeps_distances_for_display() {
        let fx = fixture();
        let near_quiet = seed_member(&fx, 44.9790, -93.2650).await;
        let far_hot = seed_member(&fx, 45.0100, -93.2650).await;
        fx.entities.update_score(far_hot, 50.0).await.unwrap();
        fx.entities.update_score(near_quiet, 1.0).await.unwrap();

        let mut query = NearbyQuery::at(ORIGIN, 20.0);
        query.order = NearbyOrder::Score;

        let page = fx
            .service
            .find_nearby(Uuid::new_v4(), &query)
            .await
            .unwrap();
        assert_eq!(page.hits[0].entity.id, far_hot);
        assert!(page.hits[0].distance_km.is_some());
        assert!(page.hits[1].distance_km.is_some());
    }

    #[tokio::test]
    async fn test_trending_orders_by_score_and_windows_by_start() {
        let fx = fixture();
        let now = fx.clock.now();

        let seed_plan = |title: &str, hours: i64, score: f64| {
            let entity = Rankable::new(EntityKind::Plan, title, now)
                .with_start_time(now + ChronoDuration::hours(hours))
                .with_position(Position::new(44.98, -93.26));
            let id = entity.id;
            let entities = fx.entities.clone();
            async move {
                entities.insert(entity).await.unwrap();
                entities.update_score(id, score).await.unwrap();
                id
            }
        };

        let tonight_hot = seed_plan("tonight hot", 2, 40.0).await;
        let tonight_mild = seed_plan("tonight mild", 3, 10.0).await;
        let next_week = seed_plan("next week", 24 * 7, 90.0).await;

        let query = TrendingQuery {
            starts_after: Some(now),
            starts_before: Some(now + ChronoDuration::hours(12)),
            ..TrendingQuery::default()
        };
        let page = fx.service.find_trending(&query).await.unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.hits[0].entity.id, tonight_hot);
        assert_eq!(page.hits[1].entity.id, tonight_mild);
        assert!(page.hits.iter().all(|h| h.entity.id != next_week));
        // No origin on the query: no distance annotation
        assert!(page.hits[0].distance_km.is_none());
    }

    #[tokio::test]
    async fn test_trending_geo_scope_annotates_distance() {
        let fx = fixture();
        let now = fx.clock.now();

        let inside = Rankable::new(EntityKind::Venue, "inside", now)
            .with_position(Position::new(44.9790, -93.2650));
        let inside_id = inside.id;
        let outside = Rankable::new(EntityKind::Venue, "outside", now)
            .with_position(Position::new(46.0, -93.2650));
        fx.entities.insert(inside).await.unwrap();
        fx.entities.insert(outside).await.unwrap();

        let query = TrendingQuery {
            near: Some(GeoScope {
                origin: ORIGIN,
                radius_km: 10.0,
            }),
            ..TrendingQuery::default()
        };
        let page = fx.service.find_trending(&query).await.unwrap();

        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].entity.id, inside_id);
        assert!(page.hits[0].distance_km.is_some());
    }

    #[tokio::test]
    async fn test_unscored_entities_sort_last_but_are_returned() {
        let fx = fixture();
        let now = fx.clock.now();

        let scored = Rankable::new(EntityKind::Plan, "scored", now);
        let scored_id = scored.id;
        let unscored = Rankable::new(EntityKind::Plan, "unscored", now);
        let unscored_id = unscored.id;
        fx.entities.insert(scored).await.unwrap();
        fx.entities.insert(unscored).await.unwrap();
        fx.entities.update_score(scored_id, 12.0).await.unwrap();

        let page = fx
            .service
            .find_trending(&TrendingQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.hits[0].entity.id, scored_id);
        assert_eq!(page.hits[1].entity.id, unscored_id);
    }
}
