//! Domain model for rankable, discoverable content
//!
//! A [`Rankable`] is anything the engine can score or surface in a discovery
//! query: a plan (event), a venue, or a member who is out and discoverable.
//! The trending score on a rankable is a cache of a pure function of its
//! interaction counts and age; it is only ever written by the score refresh
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PulseError, Result};

/// What kind of content a rankable entity is.
///
/// Members are discoverable (nearby) but never scored; plans and venues are
/// both discoverable and scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Member,
    Plan,
    Venue,
}

impl EntityKind {
    /// Stable string form used in persisted documents
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Member => "member",
            EntityKind::Plan => "plan",
            EntityKind::Venue => "venue",
        }
    }

    /// Parse the persisted string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(EntityKind::Member),
            "plan" => Some(EntityKind::Plan),
            "venue" => Some(EntityKind::Venue),
            _ => None,
        }
    }
}

/// A WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Reject NaN/infinite and out-of-range coordinates before any query runs
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(PulseError::InvalidArgument(
                "coordinates must be finite numbers".into(),
            ));
        }
        if self.lat < -90.0 || self.lat > 90.0 {
            return Err(PulseError::InvalidArgument(format!(
                "latitude out of range: {}",
                self.lat
            )));
        }
        if self.lon < -180.0 || self.lon > 180.0 {
            return Err(PulseError::InvalidArgument(format!(
                "longitude out of range: {}",
                self.lon
            )));
        }
        Ok(())
    }
}

/// A scoreable, discoverable content entity
///
/// `view_count` is the denormalized counter maintained solely by atomic
/// increments at the store; the join count is never stored here, it is read
/// live from the attendance store at recompute time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rankable {
    pub id: Uuid,
    pub kind: EntityKind,
    pub title: String,

    /// When the entity was created; the age input of the decay function
    pub created_at: DateTime<Utc>,

    /// For plans: when the plan starts. Entities with a future start time are
    /// "active" and included in the scheduled sweep.
    pub start_time: Option<DateTime<Utc>>,

    /// Required for venues, optional for plans (inherited from their venue),
    /// present for members who have opted into discovery
    pub position: Option<Position>,

    /// Liveness timestamp, refreshed on every interaction
    pub last_active_at: DateTime<Utc>,

    pub view_count: u64,

    /// Authoritative time-decayed engagement score; written only by the
    /// score refresh engine
    pub trending_score: f64,
}

impl Rankable {
    /// Create a new entity with zero interactions and score 0
    pub fn new(kind: EntityKind, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            created_at,
            start_time: None,
            position: None,
            last_active_at: created_at,
            view_count: 0,
            trending_score: 0.0,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

/// A directional blocked relationship, consumed from the relationship store.
///
/// Storage is asymmetric (one row per ordered pair); visibility is symmetric:
/// if A blocked B, neither sees the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRelation {
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
}

/// Raw engagement signal kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    View,
    Join,
}

/// An ephemeral interaction fact, published on the in-process fact stream.
///
/// Facts are never persisted by this engine; only their aggregate effect on
/// the counters matters, and recompute always reads the counters fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub entity_id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: InteractionKind,
    pub at: DateTime<Utc>,
}
