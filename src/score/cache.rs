//! Read-through score cache
//!
//! Keyed by entity ID with a per-entry TTL. The cache is never the source of
//! truth: on a miss or expiry the authoritative store is read and the cache
//! repopulated. Writes are last-write-wins; no compare-and-swap is needed
//! because recomputing a score from the same counters is idempotent.
//!
//! Invalidation is a *capability*: a backend that cannot delete reports so
//! through the return value of [`ScoreCache::invalidate`], and callers log
//! the degraded mode (stale reads persist until natural TTL expiry).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Cache contract for computed trending scores
#[async_trait]
pub trait ScoreCache: Send + Sync {
    /// Cached score if present and unexpired
    async fn get(&self, entity_id: Uuid) -> Option<f64>;

    /// Overwrite unconditionally and reset the TTL
    async fn set(&self, entity_id: Uuid, score: f64, ttl: Duration);

    /// Remove the entry immediately. Returns `false` when the backend does
    /// not support deletion; that is a no-op, not an error, but the caller
    /// must log it since stale reads persist until TTL expiry.
    async fn invalidate(&self, entity_id: Uuid) -> bool;
}

// ============================================================================
// In-memory backend
// ============================================================================

struct CacheEntry {
    score: f64,
    expires_at: Instant,
}

/// Counter snapshot for the in-memory cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// DashMap-backed score cache with TTL entries.
///
/// All operations are O(1); expired entries are dropped lazily on read and
/// in bulk by the background cleanup task.
pub struct MemoryScoreCache {
    entries: DashMap<Uuid, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryScoreCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Drop all expired entries; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryScoreCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoreCache for MemoryScoreCache {
    async fn get(&self, entity_id: Uuid) -> Option<f64> {
        if let Some(entry) = self.entries.get(&entity_id) {
            if entry.expires_at > Instant::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.score);
            }
        }
        // Absent, or present but expired: drop the stale entry lazily
        if self.entries.remove(&entity_id).is_some() {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn set(&self, entity_id: Uuid, score: f64, ttl: Duration) {
        self.entries.insert(
            entity_id,
            CacheEntry {
                score,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn invalidate(&self, entity_id: Uuid) -> bool {
        self.entries.remove(&entity_id);
        true
    }
}

// ============================================================================
// Background cleanup task
// ============================================================================

/// Spawn a background task that periodically drops expired score entries
pub fn spawn_cache_cleanup_task(
    cache: Arc<MemoryScoreCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let handle = tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        // The first tick is immediate; there is nothing to clean yet
        interval_timer.tick().await;
        loop {
            interval_timer.tick().await;
            let removed = cache.cleanup_expired();
            if removed > 0 {
                let stats = cache.stats();
                debug!(
                    removed = removed,
                    entries = stats.entry_count,
                    hit_rate = format!("{:.1}%", stats.hit_rate()),
                    "Score cache cleanup completed"
                );
            }
        }
    });

    info!(
        interval_secs = interval.as_secs(),
        "Score cache cleanup task started"
    );
    handle
}

// ============================================================================
// Tests
// ============================================================================
