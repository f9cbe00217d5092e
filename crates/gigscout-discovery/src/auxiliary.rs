//! Actor-scoped annotations merged into listings after a fetch.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use gigscout_adapters::ListingSource;
use gigscout_core::Listing;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryData {
    pub application_counts: HashMap<String, u32>,
    pub applied: HashSet<String>,
}

impl AuxiliaryData {
    pub fn application_count(&self, listing_id: &str) -> u32 {
        self.application_counts.get(listing_id).copied().unwrap_or(0)
    }

    pub fn has_applied(&self, listing_id: &str) -> bool {
        self.applied.contains(listing_id)
    }

    pub fn merge(&mut self, other: AuxiliaryData) {
        self.application_counts.extend(other.application_counts);
        self.applied.extend(other.applied);
    }
}

/// Fetch counts and applied flags for every listing as one concurrent batch.
///
/// Nothing is loaded without an authenticated actor. A failed lookup leaves
/// that listing at zero applications / not applied.
pub async fn load_auxiliary(
    source: &dyn ListingSource,
    listings: &[Listing],
    actor_id: Option<&str>,
) -> AuxiliaryData {
    let Some(actor_id) = actor_id else {
        return AuxiliaryData::default();
    };

    let lookups = listings.iter().map(|listing| async move {
        let (count, applied) = tokio::join!(
            source.count_applications(&listing.id),
            source.has_applied(&listing.id, actor_id)
        );
        let count = count.unwrap_or_else(|err| {
            debug!(listing_id = %listing.id, error = %err, "application count unavailable");
            0
        });
        let applied = applied.unwrap_or_else(|err| {
            debug!(listing_id = %listing.id, error = %err, "applied flag unavailable");
            false
        });
        (listing.id.clone(), count, applied)
    });

    let mut aux = AuxiliaryData::default();
    for (id, count, applied) in join_all(lookups).await {
        if applied {
            aux.applied.insert(id.clone());
        }
        aux.application_counts.insert(id, count);
    }
    aux
}
