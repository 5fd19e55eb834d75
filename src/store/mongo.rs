//! MongoDB client and store adapters
//!
//! The client/collection wrapper applies schema-declared indexes at
//! construction and keeps soft-deleted documents out of reads. The entity
//! adapter pushes the discovery predicates down into the store: `$geoNear`
//! serves the radius and distance ordering off the 2dsphere index, `$nin`
//! serves the exclusion set, and `$facet` returns the page and the
//! un-paginated total in one round trip.

use bson::{doc, Bson, DateTime, Document};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    options::{IndexOptions, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use async_trait::async_trait;

use crate::model::{BlockedRelation, Rankable};
use crate::store::schemas::{
    AttendanceDoc, EntityDoc, Metadata, RelationshipDoc, ATTENDANCE_COLLECTION, ENTITY_COLLECTION,
    RELATIONSHIP_COLLECTION, REL_TYPE_BLOCKED,
};
use crate::store::{EntityStore, GeoFilter, NearbyOrder, RelationshipStore, TrendingFilter};
use crate::types::{PulseError, Result};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| PulseError::Store(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection with timeout
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| PulseError::Store(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the raw MongoDB client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| PulseError::Store(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<()> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        self.inner
            .insert_one(item)
            .await
            .map_err(|e| PulseError::Store(format!("Insert failed: {}", e)))?;

        Ok(())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        // Add is_deleted check
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .find_one(full_filter)
            .await
            .map_err(|e| PulseError::Store(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>> {
        // Add is_deleted check
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let mut cursor = self
            .inner
            .find(full_filter)
            .await
            .map_err(|e| PulseError::Store(format!("Find failed: {}", e)))?;

        let mut results = Vec::new();
        loop {
            match cursor.try_next().await {
                Ok(Some(item)) => results.push(item),
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading document: {}", e);
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update)
            .await
            .map_err(|e| PulseError::Store(format!("Update failed: {}", e)))
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

// ============================================================================
// Query construction
// ============================================================================

/// Filter document applied inside `$geoNear` for a nearby query
fn nearby_query_doc(filter: &GeoFilter) -> Document {
    let mut query = doc! { "metadata.is_deleted": { "$ne": true } };
    if !filter.exclude_ids.is_empty() {
        let ids: Vec<String> = filter.exclude_ids.iter().map(Uuid::to_string).collect();
        query.insert("_id", doc! { "$nin": ids });
    }
    if !filter.kinds.is_empty() {
        let kinds: Vec<&str> = filter.kinds.iter().map(|k| k.as_str()).collect();
        query.insert("kind", doc! { "$in": kinds });
    }
    if let Some(since) = filter.active_since {
        query.insert(
            "last_active_at",
            doc! { "$gte": DateTime::from_chrono(since) },
        );
    }
    query
}

/// Aggregation pipeline for a nearby query: `$geoNear` (radius + exclusion
/// predicates pushed down, nearest-first by default), optional score
/// re-sort, `$facet` for page + total.
fn nearby_pipeline(filter: &GeoFilter) -> Vec<Document> {
    let mut pipeline = vec![doc! {
        "$geoNear": {
            "near": {
                "type": "Point",
                "coordinates": [filter.origin.lon, filter.origin.lat],
            },
            "key": "position",
            "distanceField": "distance_m",
            "maxDistance": filter.radius_m,
            "query": nearby_query_doc(filter),
            "spherical": true,
        }
    }];
    if filter.order == NearbyOrder::Score {
        pipeline.push(doc! { "$sort": { "trending_score": -1, "distance_m": 1 } });
    }
    pipeline.push(page_facet(filter.offset, filter.limit));
    pipeline
}

/// Filter document for a trending query (everything except the geo scope)
fn trending_query_doc(filter: &TrendingFilter) -> Document {
    let mut query = doc! { "metadata.is_deleted": { "$ne": true } };
    if !filter.kinds.is_empty() {
        let kinds: Vec<&str> = filter.kinds.iter().map(|k| k.as_str()).collect();
        query.insert("kind", doc! { "$in": kinds });
    }
    let mut window = Document::new();
    if let Some(after) = filter.starts_after {
        window.insert("$gte", DateTime::from_chrono(after));
    }
    if let Some(before) = filter.starts_before {
        window.insert("$lte", DateTime::from_chrono(before));
    }
    if !window.is_empty() {
        query.insert("start_time", window);
    }
    query
}

/// Aggregation pipeline for a geo-scoped trending query
fn trending_pipeline(filter: &TrendingFilter, origin_lon: f64, origin_lat: f64, radius_m: f64) -> Vec<Document> {
    vec![
        doc! {
            "$geoNear": {
                "near": { "type": "Point", "coordinates": [origin_lon, origin_lat] },
                "key": "position",
                "distanceField": "distance_m",
                "maxDistance": radius_m,
                "query": trending_query_doc(filter),
                "spherical": true,
            }
        },
        doc! { "$sort": { "trending_score": -1 } },
        page_facet(filter.offset, filter.limit),
    ]
}

fn page_facet(offset: u64, limit: u64) -> Document {
    doc! {
        "$facet": {
            "page": [ { "$skip": offset as i64 }, { "$limit": limit as i64 } ],
            "total": [ { "$count": "count" } ],
        }
    }
}

/// Unpack a `$facet` result into entities and the un-paginated total
fn parse_facet(facet: &Document) -> Result<(Vec<Rankable>, u64)> {
    let mut entities = Vec::new();
    if let Ok(page) = facet.get_array("page") {
        for item in page {
            let Bson::Document(doc) = item else { continue };
            match bson::from_document::<EntityDoc>(doc.clone()) {
                Ok(entity_doc) => match Rankable::try_from(entity_doc) {
                    Ok(entity) => entities.push(entity),
                    Err(e) => error!(error = %e, "Skipping corrupt entity document"),
                },
                Err(e) => error!(error = %e, "Skipping undecodable entity document"),
            }
        }
    }

    let total = facet
        .get_array("total")
        .ok()
        .and_then(|arr| arr.first())
        .and_then(Bson::as_document)
        .and_then(|doc| doc.get("count"))
        .map(|count| match count {
            Bson::Int32(n) => *n as u64,
            Bson::Int64(n) => *n as u64,
            _ => 0,
        })
        .unwrap_or(0);

    Ok((entities, total))
}

// ============================================================================
// Entity store adapter
// ============================================================================

/// MongoDB-backed entity store
pub struct MongoEntityStore {
    entities: MongoCollection<EntityDoc>,
}

impl MongoEntityStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            entities: client.collection::<EntityDoc>(ENTITY_COLLECTION).await?,
        })
    }

    async fn run_facet_pipeline(&self, pipeline: Vec<Document>) -> Result<(Vec<Rankable>, u64)> {
        let mut cursor = self
            .entities
            .inner()
            .aggregate(pipeline)
            .await
            .map_err(|e| PulseError::Store(format!("Aggregation failed: {}", e)))?;

        let facet = cursor
            .try_next()
            .await
            .map_err(|e| PulseError::Store(format!("Aggregation cursor failed: {}", e)))?;

        match facet {
            Some(facet) => parse_facet(&facet),
            None => Ok((Vec::new(), 0)),
        }
    }
}

#[async_trait]
impl EntityStore for MongoEntityStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Rankable>> {
        let doc = self.entities.find_one(doc! { "_id": id.to_string() }).await?;
        doc.map(Rankable::try_from).transpose()
    }

    async fn insert(&self, entity: Rankable) -> Result<()> {
        self.entities.insert_one(EntityDoc::from(&entity)).await
    }

    async fn update_score(&self, id: Uuid, score: f64) -> Result<()> {
        let result = self
            .entities
            .update_one(
                doc! { "_id": id.to_string() },
                doc! { "$set": {
                    "trending_score": score,
                    "metadata.updated_at": DateTime::now(),
                } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PulseError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    async fn increment_view_count(&self, id: Uuid) -> Result<()> {
        // Atomic at the store; never read-modify-write from the application
        let result = self
            .entities
            .update_one(
                doc! { "_id": id.to_string() },
                doc! {
                    "$inc": { "view_count": 1 },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PulseError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    async fn touch_last_active(&self, id: Uuid, at: chrono::DateTime<Utc>) -> Result<()> {
        let result = self
            .entities
            .update_one(
                doc! { "_id": id.to_string() },
                doc! { "$set": {
                    "last_active_at": DateTime::from_chrono(at),
                    "metadata.updated_at": DateTime::now(),
                } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PulseError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    async fn find_nearby(&self, filter: &GeoFilter) -> Result<(Vec<Rankable>, u64)> {
        self.run_facet_pipeline(nearby_pipeline(filter)).await
    }

    async fn find_trending(&self, filter: &TrendingFilter) -> Result<(Vec<Rankable>, u64)> {
        if let Some((origin, radius_m)) = filter.scope {
            return self
                .run_facet_pipeline(trending_pipeline(filter, origin.lon, origin.lat, radius_m))
                .await;
        }

        let query = trending_query_doc(filter);
        let total = self
            .entities
            .inner()
            .count_documents(query.clone())
            .await
            .map_err(|e| PulseError::Store(format!("Count failed: {}", e)))?;

        let mut cursor = self
            .entities
            .inner()
            .find(query)
            .sort(doc! { "trending_score": -1 })
            .skip(filter.offset)
            .limit(filter.limit as i64)
            .await
            .map_err(|e| PulseError::Store(format!("Find failed: {}", e)))?;

        let mut entities = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| PulseError::Store(format!("Cursor failed: {}", e)))?
        {
            match Rankable::try_from(doc) {
                Ok(entity) => entities.push(entity),
                Err(e) => error!(error = %e, "Skipping corrupt entity document"),
            }
        }
        Ok((entities, total))
    }

    async fn list_upcoming(
        &self,
        now: chrono::DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Rankable>> {
        let query = doc! {
            "metadata.is_deleted": { "$ne": true },
            "start_time": { "$gt": DateTime::from_chrono(now) },
        };

        let mut cursor = self
            .entities
            .inner()
            .find(query)
            // Stable order so offset pagination walks the set exactly once
            .sort(doc! { "start_time": 1, "_id": 1 })
            .skip(offset)
            .limit(limit as i64)
            .await
            .map_err(|e| PulseError::Store(format!("Find failed: {}", e)))?;

        let mut entities = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| PulseError::Store(format!("Cursor failed: {}", e)))?
        {
            match Rankable::try_from(doc) {
                Ok(entity) => entities.push(entity),
                Err(e) => error!(error = %e, "Skipping corrupt entity document"),
            }
        }
        Ok(entities)
    }
}

// ============================================================================
// Relationship store adapter
// ============================================================================

/// MongoDB-backed relationship/attendance store
pub struct MongoRelationshipStore {
    attendance: MongoCollection<AttendanceDoc>,
    relationships: MongoCollection<RelationshipDoc>,
}

impl MongoRelationshipStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            attendance: client
                .collection::<AttendanceDoc>(ATTENDANCE_COLLECTION)
                .await?,
            relationships: client
                .collection::<RelationshipDoc>(RELATIONSHIP_COLLECTION)
                .await?,
        })
    }
}

#[async_trait]
impl RelationshipStore for MongoRelationshipStore {
    async fn blocked_pairs(&self, user_id: Uuid) -> Result<Vec<BlockedRelation>> {
        let id = user_id.to_string();
        let docs = self
            .relationships
            .find_many(doc! {
                "rel_type": REL_TYPE_BLOCKED,
                "$or": [ { "requester_id": &id }, { "recipient_id": &id } ],
            })
            .await?;

        let mut pairs = Vec::with_capacity(docs.len());
        for doc in docs {
            match (
                Uuid::parse_str(&doc.requester_id),
                Uuid::parse_str(&doc.recipient_id),
            ) {
                (Ok(requester_id), Ok(recipient_id)) => pairs.push(BlockedRelation {
                    requester_id,
                    recipient_id,
                }),
                _ => error!(
                    relationship_id = ?doc.id,
                    "Skipping relationship with malformed ids"
                ),
            }
        }
        Ok(pairs)
    }

    async fn attendance_count(&self, entity_id: Uuid) -> Result<u64> {
        self.attendance
            .inner()
            .count_documents(doc! {
                "entity_id": entity_id.to_string(),
                "metadata.is_deleted": { "$ne": true },
            })
            .await
            .map_err(|e| PulseError::Store(format!("Count failed: {}", e)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    // Adapter round trips against a live database are exercised in a
    // deployment environment; these tests cover the query construction,
    // which is where the pushed-down predicate bugs would live.

    use super::*;
    use std::collections::HashSet;

    use crate::model::Position;

    fn base_filter() -> GeoFilter {
        GeoFilter {
            origin: Position::new(44.9778, -93.2650),
            radius_m: 5_000.0,
            exclude_ids: HashSet::new(),
            kinds: vec![],
            active_since: None,
            order: NearbyOrder::Distance,
            limit: 20,
            offset: 0,
        }
    }

    #[test]
    fn test_nearby_pipeline_pushes_radius_and_exclusions_down() {
        let mut filter = base_filter();
        let excluded = Uuid::new_v4();
        filter.exclude_ids.insert(excluded);

        let pipeline = nearby_pipeline(&filter);
        assert_eq!(pipeline.len(), 2);

        let geo_near = pipeline[0].get_document("$geoNear").unwrap();
        assert_eq!(geo_near.get_f64("maxDistance").unwrap(), 5_000.0);
        assert_eq!(geo_near.get_str("distanceField").unwrap(), "distance_m");

        let query = geo_near.get_document("query").unwrap();
        let nin = query
            .get_document("_id")
            .unwrap()
            .get_array("$nin")
            .unwrap();
        assert_eq!(nin.len(), 1);
        assert_eq!(nin[0], Bson::String(excluded.to_string()));
    }

    #[test]
    fn test_nearby_pipeline_score_order_adds_sort_stage() {
        let mut filter = base_filter();
        filter.order = NearbyOrder::Score;

        let pipeline = nearby_pipeline(&filter);
        assert_eq!(pipeline.len(), 3);
        let sort = pipeline[1].get_document("$sort").unwrap();
        assert_eq!(sort.get_i32("trending_score").unwrap(), -1);
    }

    #[test]
    fn test_nearby_query_omits_unused_predicates() {
        let query = nearby_query_doc(&base_filter());
        assert!(!query.contains_key("_id"));
        assert!(!query.contains_key("kind"));
        assert!(!query.contains_key("last_active_at"));
        assert!(query.contains_key("metadata.is_deleted"));
    }

    #[test]
    fn test_trending_query_builds_start_window() {
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let filter = TrendingFilter {
            starts_after: Some(now),
            starts_before: Some(now + Duration::hours(12)),
            scope: None,
            kinds: vec![crate::model::EntityKind::Plan],
            limit: 20,
            offset: 0,
        };

        let query = trending_query_doc(&filter);
        let window = query.get_document("start_time").unwrap();
        assert!(window.contains_key("$gte"));
        assert!(window.contains_key("$lte"));
        let kinds = query.get_document("kind").unwrap().get_array("$in").unwrap();
        assert_eq!(kinds[0], Bson::String("plan".into()));
    }

    #[test]
    fn test_facet_parse_reads_page_and_total() {
        let entity = crate::model::Rankable::new(
            crate::model::EntityKind::Venue,
            "First Avenue",
            Utc::now(),
        );
        let mut entity_doc = bson::to_document(&EntityDoc::from(&entity)).unwrap();
        // $geoNear annotates each document; decoding must tolerate it
        entity_doc.insert("distance_m", 1234.5);

        let facet = doc! {
            "page": [ entity_doc ],
            "total": [ { "count": 57_i32 } ],
        };
        let (entities, total) = parse_facet(&facet).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, entity.id);
        assert_eq!(total, 57);
    }

    #[test]
    fn test_facet_parse_of_empty_result() {
        let facet = doc! { "page": [], "total": [] };
        let (entities, total) = parse_facet(&facet).unwrap();
        assert!(entities.is_empty());
        assert_eq!(total, 0);
    }
}
