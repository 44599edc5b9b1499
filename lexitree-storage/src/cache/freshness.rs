//! Staleness metadata carried by cache reads.

use chrono::{DateTime, Utc};
use lexitree_core::MaterializedTree;
use std::time::Duration;

/// A cached tree together with whether it was stale when read.
///
/// Callers serving a tree from the cache learn whether it is stale and how
/// old it is without a second round trip.
#[derive(Debug, Clone)]
pub struct CacheRead {
    tree: MaterializedTree,
    read_at: DateTime<Utc>,
    stale: bool,
}

impl CacheRead {
    pub fn from_cache(tree: MaterializedTree, stale: bool) -> Self {
        Self {
            tree,
            read_at: Utc::now(),
            stale,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn tree(&self) -> &MaterializedTree {
        &self.tree
    }

    pub fn into_tree(self) -> MaterializedTree {
        self.tree
    }

    /// How old the cached tree was when it was read.
    pub fn age(&self) -> Duration {
        self.read_at
            .signed_duration_since(self.tree.generated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
