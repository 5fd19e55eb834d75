//! Exclusion set resolution
//!
//! Derives, per request, the set of user IDs that must never appear in a
//! requester's discovery results: everyone the requester blocked, everyone
//! who blocked the requester, and the requester themself. Deliberately not
//! cached — never leaking a blocked user outweighs the cost of a fresh read
//! per query.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::store::RelationshipStore;
use crate::types::Result;

/// Resolves the per-request discovery exclusion set
pub struct ExclusionResolver {
    relationships: Arc<dyn RelationshipStore>,
}

impl ExclusionResolver {
    pub fn new(relationships: Arc<dyn RelationshipStore>) -> Self {
        Self { relationships }
    }

    /// Blockers of `requester` ∪ blocked by `requester` ∪ `{requester}`.
    ///
    /// Block storage is directional, but visibility is symmetric: whichever
    /// side of the pair the requester is on, the other party is excluded.
    pub async fn resolve(&self, requester: Uuid) -> Result<HashSet<Uuid>> {
        let pairs = self.relationships.blocked_pairs(requester).await?;

        let mut excluded: HashSet<Uuid> = pairs
            .into_iter()
            .map(|pair| {
                if pair.requester_id == requester {
                    pair.recipient_id
                } else {
                    pair.requester_id
                }
            })
            .collect();
        excluded.insert(requester);
        Ok(excluded)
    }
}
