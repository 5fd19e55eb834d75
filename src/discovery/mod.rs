//! Geospatial discovery
//!
//! Answers "what is near me" and "what is trending" with blocked
//! relationships and the requester excluded, distances annotated for
//! display, and limit/offset pagination with a total for has-more
//! computation.

pub mod engine;
pub mod exclusion;
pub mod geo;

pub use engine::{
    DiscoveryConfig, DiscoveryHit, DiscoveryPage, DiscoveryService, GeoScope, NearbyQuery,
    TrendingQuery,
};
pub use exclusion::ExclusionResolver;
pub use geo::{display_km, distance_meters, EARTH_RADIUS_M};
