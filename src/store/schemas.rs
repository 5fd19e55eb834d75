//! MongoDB document schemas
//!
//! Defines the persisted document structures for entities, attendance rows,
//! and blocked relationships, with their index declarations. Positions are
//! stored as GeoJSON points so the 2dsphere index can serve the pushed-down
//! radius predicate.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{EntityKind, Position, Rankable};
use crate::store::mongo::{IntoIndexes, MutMetadata};
use crate::types::{PulseError, Result};

/// Collection name for rankable entities
pub const ENTITY_COLLECTION: &str = "entities";

/// Collection name for attendance/follow rows
pub const ATTENDANCE_COLLECTION: &str = "attendance";

/// Collection name for blocked relationships
pub const RELATIONSHIP_COLLECTION: &str = "relationships";

/// Relationship type marker for blocks
pub const REL_TYPE_BLOCKED: &str = "blocked";

/// Common metadata for all documents
///
/// Tracks creation, update, and soft deletion timestamps.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was soft-deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata with current timestamps
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(DateTime::now()),
            created_at: Some(DateTime::now()),
        }
    }
}

/// GeoJSON point as MongoDB expects it: `coordinates` is `[lon, lat]`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GeoJsonPoint {
    #[serde(rename = "type")]
    pub point_type: String,
    pub coordinates: [f64; 2],
}

impl From<Position> for GeoJsonPoint {
    fn from(position: Position) -> Self {
        Self {
            point_type: "Point".to_string(),
            coordinates: [position.lon, position.lat],
        }
    }
}

impl GeoJsonPoint {
    pub fn position(&self) -> Position {
        Position::new(self.coordinates[1], self.coordinates[0])
    }
}

/// Rankable entity document
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EntityDoc {
    /// Entity id (UUID string)
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Entity kind discriminator: "member", "plan", "venue"
    pub kind: String,

    pub title: String,

    /// GeoJSON position; absent for entities not yet discoverable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<GeoJsonPoint>,

    /// Domain creation time (the decay age input; distinct from the
    /// document bookkeeping in `metadata`)
    pub created_at: DateTime,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime>,

    pub last_active_at: DateTime,

    #[serde(default)]
    pub view_count: i64,

    #[serde(default)]
    pub trending_score: f64,
}

impl Default for EntityDoc {
    fn default() -> Self {
        let now = DateTime::now();
        Self {
            id: None,
            metadata: Metadata::default(),
            kind: String::new(),
            title: String::new(),
            position: None,
            created_at: now,
            start_time: None,
            last_active_at: now,
            view_count: 0,
            trending_score: 0.0,
        }
    }
}

impl From<&Rankable> for EntityDoc {
    fn from(entity: &Rankable) -> Self {
        Self {
            id: Some(entity.id.to_string()),
            metadata: Metadata::new(),
            kind: entity.kind.as_str().to_string(),
            title: entity.title.clone(),
            position: entity.position.map(GeoJsonPoint::from),
            created_at: DateTime::from_chrono(entity.created_at),
            start_time: entity.start_time.map(DateTime::from_chrono),
            last_active_at: DateTime::from_chrono(entity.last_active_at),
            view_count: entity.view_count as i64,
            trending_score: entity.trending_score,
        }
    }
}

impl TryFrom<EntityDoc> for Rankable {
    type Error = PulseError;

    fn try_from(doc: EntityDoc) -> Result<Self> {
        let raw_id = doc
            .id
            .ok_or_else(|| PulseError::Store("entity document missing _id".into()))?;
        let id = Uuid::parse_str(&raw_id)
            .map_err(|_| PulseError::Store(format!("entity _id is not a uuid: {raw_id}")))?;
        let kind = EntityKind::parse(&doc.kind)
            .ok_or_else(|| PulseError::Store(format!("unknown entity kind: {}", doc.kind)))?;

        Ok(Self {
            id,
            kind,
            title: doc.title,
            created_at: doc.created_at.to_chrono(),
            start_time: doc.start_time.map(|t| t.to_chrono()),
            position: doc.position.as_ref().map(GeoJsonPoint::position),
            last_active_at: doc.last_active_at.to_chrono(),
            view_count: doc.view_count.max(0) as u64,
            trending_score: doc.trending_score,
        })
    }
}

impl IntoIndexes for EntityDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Serves the pushed-down radius predicate
            (doc! { "position": "2dsphere" }, None),
            // Sweep enumeration and trending date windows
            (doc! { "start_time": 1 }, None),
            // Trending ordering
            (doc! { "trending_score": -1 }, None),
            // Liveness window filter
            (doc! { "last_active_at": -1 }, None),
        ]
    }
}

impl MutMetadata for EntityDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Attendance/follow row: one document per (entity, user) pair
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AttendanceDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Entity joined/followed (UUID string)
    pub entity_id: String,

    /// Joining user (UUID string)
    pub user_id: String,
}

impl IntoIndexes for AttendanceDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // At most one row per (entity, user)
            (
                doc! { "entity_id": 1, "user_id": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (doc! { "user_id": 1 }, None),
        ]
    }
}

impl MutMetadata for AttendanceDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Directional relationship row (this engine only reads type "blocked")
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RelationshipDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Side that initiated the relationship (UUID string)
    pub requester_id: String,

    /// Other side (UUID string)
    pub recipient_id: String,

    /// Relationship type: "blocked", "friend", ...
    pub rel_type: String,
}

impl IntoIndexes for RelationshipDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // At most one relationship per ordered pair
            (
                doc! { "requester_id": 1, "recipient_id": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (doc! { "recipient_id": 1, "rel_type": 1 }, None),
        ]
    }
}

impl MutMetadata for RelationshipDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_entity_doc_roundtrip() {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap();
        let mut entity = Rankable::new(EntityKind::Venue, "First Avenue", created)
            .with_position(Position::new(44.9781, -93.2761));
        entity.view_count = 42;
        entity.trending_score = 8.25;

        let doc = EntityDoc::from(&entity);
        assert_eq!(doc.kind, "venue");
        assert_eq!(
            doc.position.as_ref().map(|p| p.coordinates),
            Some([-93.2761, 44.9781])
        );

        let back = Rankable::try_from(doc).unwrap();
        assert_eq!(back.id, entity.id);
        assert_eq!(back.kind, entity.kind);
        assert_eq!(back.position, entity.position);
        assert_eq!(back.view_count, 42);
        assert_eq!(back.trending_score, 8.25);
        assert_eq!(back.created_at, created);
    }

    #[test]
    fn test_corrupt_entity_doc_rejected() {
        let mut doc = EntityDoc {
            id: Some("not-a-uuid".into()),
            kind: "venue".into(),
            ..EntityDoc::default()
        };
        assert!(Rankable::try_from(doc.clone()).is_err());

        doc.id = Some(Uuid::new_v4().to_string());
        doc.kind = "spaceship".into();
        assert!(Rankable::try_from(doc).is_err());
    }

    #[test]
    fn test_geojson_is_lon_lat_ordered() {
        let point = GeoJsonPoint::from(Position::new(44.98, -93.26));
        assert_eq!(point.point_type, "Point");
        assert_eq!(point.coordinates, [-93.26, 44.98]);
        assert_eq!(point.position(), Position::new(44.98, -93.26));
    }
}
