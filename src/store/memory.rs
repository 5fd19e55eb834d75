//! In-memory store adapters
//!
//! DashMap-backed implementations of the store traits with naive in-memory
//! filtering. Dev mode runs on these when MongoDB is unavailable, and the
//! test suite uses them as fakes; the filtering semantics match the pushed
//! down MongoDB queries for datasets that fit in memory.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::discovery::geo::distance_meters;
use crate::model::{BlockedRelation, Rankable};
use crate::store::{EntityStore, GeoFilter, NearbyOrder, RelationshipStore, TrendingFilter};
use crate::types::{PulseError, Result};

/// In-memory entity store
pub struct MemoryEntityStore {
    entities: DashMap<Uuid, Rankable>,
    score_writes: AtomicU64,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            score_writes: AtomicU64::new(0),
        }
    }

    /// Total number of score writes accepted; lets tests observe that a
    /// cache-served recompute performed no second write
    pub fn score_write_count(&self) -> u64 {
        self.score_writes.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<Rankable> {
        self.entities.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Rankable>> {
        Ok(self.entities.get(&id).map(|e| e.value().clone()))
    }

    async fn insert(&self, entity: Rankable) -> Result<()> {
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    async fn update_score(&self, id: Uuid, score: f64) -> Result<()> {
        let mut entity = self
            .entities
            .get_mut(&id)
            .ok_or_else(|| PulseError::NotFound(format!("entity {id}")))?;
        entity.trending_score = score;
        self.score_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn increment_view_count(&self, id: Uuid) -> Result<()> {
        let mut entity = self
            .entities
            .get_mut(&id)
            .ok_or_else(|| PulseError::NotFound(format!("entity {id}")))?;
        entity.view_count += 1;
        Ok(())
    }

    async fn touch_last_active(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut entity = self
            .entities
            .get_mut(&id)
            .ok_or_else(|| PulseError::NotFound(format!("entity {id}")))?;
        entity.last_active_at = at;
        Ok(())
    }

    async fn find_nearby(&self, filter: &GeoFilter) -> Result<(Vec<Rankable>, u64)> {
        let mut matches: Vec<(Rankable, f64)> = self
            .snapshot()
            .into_iter()
            .filter(|e| !filter.exclude_ids.contains(&e.id))
            .filter(|e| filter.kinds.is_empty() || filter.kinds.contains(&e.kind))
            .filter(|e| match filter.active_since {
                Some(since) => e.last_active_at >= since,
                None => true,
            })
            .filter_map(|e| {
                let position = e.position?;
                let distance = distance_meters(&filter.origin, &position);
                (distance <= filter.radius_m).then_some((e, distance))
            })
            .collect();

        match filter.order {
            NearbyOrder::Distance => {
                matches.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(CmpOrdering::Equal));
            }
            NearbyOrder::Score => {
                matches.sort_by(|a, b| {
                    b.0.trending_score
                        .partial_cmp(&a.0.trending_score)
                        .unwrap_or(CmpOrdering::Equal)
                        .then(a.1.partial_cmp(&b.1).unwrap_or(CmpOrdering::Equal))
                });
            }
        }

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .map(|(e, _)| e)
            .collect();
        Ok((page, total))
    }

    async fn find_trending(&self, filter: &TrendingFilter) -> Result<(Vec<Rankable>, u64)> {
        let mut matches: Vec<Rankable> = self
            .snapshot()
            .into_iter()
            .filter(|e| filter.kinds.is_empty() || filter.kinds.contains(&e.kind))
            .filter(|e| match filter.starts_after {
                Some(after) => e.start_time.map(|s| s >= after).unwrap_or(false),
                None => true,
            })
            .filter(|e| match filter.starts_before {
                Some(before) => e.start_time.map(|s| s <= before).unwrap_or(false),
                None => true,
            })
            .filter(|e| match &filter.scope {
                Some((origin, radius_m)) => e
                    .position
                    .map(|p| distance_meters(origin, &p) <= *radius_m)
                    .unwrap_or(false),
                None => true,
            })
            .collect();

        matches.sort_by(|a, b| {
            b.trending_score
                .partial_cmp(&a.trending_score)
                .unwrap_or(CmpOrdering::Equal)
        });

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Rankable>> {
        let mut upcoming: Vec<Rankable> = self
            .snapshot()
            .into_iter()
            .filter(|e| e.start_time.map(|s| s > now).unwrap_or(false))
            .collect();
        // Stable order so offset pagination walks the set exactly once
        upcoming.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(upcoming
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

/// In-memory relationship/attendance store
pub struct MemoryRelationshipStore {
    /// entity id -> users attending/following
    attendance: DashMap<Uuid, Vec<Uuid>>,
    /// blocker -> blocked users
    blocks: DashMap<Uuid, Vec<Uuid>>,
}

impl MemoryRelationshipStore {
    pub fn new() -> Self {
        Self {
            attendance: DashMap::new(),
            blocks: DashMap::new(),
        }
    }

    /// Record a join/follow (idempotent per pair)
    pub fn add_attendance(&self, entity_id: Uuid, user_id: Uuid) {
        let mut users = self.attendance.entry(entity_id).or_default();
        if !users.contains(&user_id) {
            users.push(user_id);
        }
    }

    /// Record a directional block (idempotent per ordered pair)
    pub fn add_block(&self, requester_id: Uuid, recipient_id: Uuid) {
        let mut blocked = self.blocks.entry(requester_id).or_default();
        if !blocked.contains(&recipient_id) {
            blocked.push(recipient_id);
        }
    }
}

impl Default for MemoryRelationshipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationshipStore for MemoryRelationshipStore {
    async fn blocked_pairs(&self, user_id: Uuid) -> Result<Vec<BlockedRelation>> {
        let mut pairs = Vec::new();
        for entry in self.blocks.iter() {
            let requester_id = *entry.key();
            for &recipient_id in entry.value() {
                if requester_id == user_id || recipient_id == user_id {
                    pairs.push(BlockedRelation {
                        requester_id,
                        recipient_id,
                    });
                }
            }
        }
        Ok(pairs)
    }

    async fn attendance_count(&self, entity_id: Uuid) -> Result<u64> {
        Ok(self
            .attendance
            .get(&entity_id)
            .map(|users| users.len() as u64)
            .unwrap_or(0))
    }
}

// ============================================================================
// Tests
// ============================================================================
