//! Trending score pipeline
//!
//! Scores flow one way: raw interaction counters in the stores feed the pure
//! [`calculator`], the [`refresh`] engine writes the result through to the
//! authoritative store and the [`cache`], and the [`sweep`] keeps every
//! active entity's score fresh on a schedule regardless of traffic.

pub mod cache;
pub mod calculator;
pub mod refresh;
pub mod sweep;

pub use cache::{spawn_cache_cleanup_task, CacheStats, MemoryScoreCache, ScoreCache};
pub use calculator::{trending_score, DECAY_RATE, JOIN_WEIGHT, VIEW_WEIGHT};
pub use refresh::{RefreshConfig, ScoreRefreshService};
pub use sweep::{spawn_sweep_task, SweepConfig, SweepReport, SweepService};
