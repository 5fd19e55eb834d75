//! Store interfaces consumed by the ranking and discovery engine
//!
//! The engine owns no persistence of its own: entities, attendance rows, and
//! blocked relationships all live behind these narrow traits. Two
//! implementations ship with the crate:
//!
//! - [`mongo`]: MongoDB adapters with the geo-radius and ID-exclusion
//!   predicates pushed down into the query (the deployment target)
//! - [`memory`]: DashMap-backed adapters with naive in-memory filtering,
//!   used by dev mode and tests

pub mod memory;
pub mod mongo;
pub mod schemas;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{BlockedRelation, EntityKind, Position, Rankable};
use crate::types::Result;

pub use memory::{MemoryEntityStore, MemoryRelationshipStore};
pub use mongo::{MongoClient, MongoEntityStore, MongoRelationshipStore};

/// Ordering for nearby queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearbyOrder {
    /// Nearest first (the default)
    #[default]
    Distance,
    /// Highest trending score first; distance is still computed for display
    Score,
}

/// Pushed-down predicate set for a nearby query.
///
/// Logical filter order: excluded ids, non-null position, liveness window,
/// radius. Stores may evaluate these in any order as long as the result set
/// and `total` agree with it.
#[derive(Debug, Clone)]
pub struct GeoFilter {
    pub origin: Position,
    pub radius_m: f64,
    pub exclude_ids: HashSet<Uuid>,
    /// Empty means all kinds
    pub kinds: Vec<EntityKind>,
    /// When set, require `last_active_at >= active_since`
    pub active_since: Option<DateTime<Utc>>,
    pub order: NearbyOrder,
    pub limit: u64,
    pub offset: u64,
}

/// Pushed-down predicate set for a trending query.
///
/// Always ordered by descending trending score; a missing or zero score
/// sorts an entity to the bottom, it never excludes it.
#[derive(Debug, Clone)]
pub struct TrendingFilter {
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
    /// Optional geo restriction: origin and radius in meters
    pub scope: Option<(Position, f64)>,
    /// Empty means all kinds
    pub kinds: Vec<EntityKind>,
    pub limit: u64,
    pub offset: u64,
}

/// Authoritative store for rankable entities.
///
/// `increment_view_count` must be an atomic increment at the store, never an
/// application-level read-modify-write, so concurrent views cannot lose
/// updates.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Rankable>>;

    /// Insert a new entity (used by seeding and by the embedding CRUD layer)
    async fn insert(&self, entity: Rankable) -> Result<()>;

    /// Write the authoritative trending score
    async fn update_score(&self, id: Uuid, score: f64) -> Result<()>;

    /// Atomic view-counter increment
    async fn increment_view_count(&self, id: Uuid) -> Result<()>;

    /// Refresh the liveness timestamp
    async fn touch_last_active(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Candidates within the filter radius, with exclusions applied, ordered
    /// per the filter, paginated. Returns the page and the un-paginated total.
    async fn find_nearby(&self, filter: &GeoFilter) -> Result<(Vec<Rankable>, u64)>;

    /// Top entities by trending score under the filter. Returns the page and
    /// the un-paginated total.
    async fn find_trending(&self, filter: &TrendingFilter) -> Result<(Vec<Rankable>, u64)>;

    /// Enumerate entities whose start time is after `now`, ordered stably,
    /// for the scheduled sweep. `offset`/`limit` page through the set.
    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Rankable>>;
}

/// Store for relationships consumed (not owned) by this engine: blocked
/// pairs and attendance rows.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// All blocked relationships where `user_id` is either side
    async fn blocked_pairs(&self, user_id: Uuid) -> Result<Vec<BlockedRelation>>;

    /// Live join count for an entity (attendance rows for plans, follower
    /// rows for venues)
    async fn attendance_count(&self, entity_id: Uuid) -> Result<u64>;
}

/// Injectable time source so decay and liveness-window calculations are
/// deterministic under test
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually-advanced clock for tests
#[cfg(test)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
