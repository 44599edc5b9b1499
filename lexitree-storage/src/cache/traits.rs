//! Tree cache and invalidation log traits.
//!
//! The cache holds one materialized tree per container. Entries are replaced
//! wholesale, never edited in place, and become stale either through an
//! explicit mark from the invalidation tracker or by age.

use async_trait::async_trait;
use chrono::Utc;
use lexitree_core::{
    DocumentId, InvalidationMark, InvalidationReason, LexResult, MaterializedTree, Timestamp,
    TREE_FORMAT_VERSION,
};
use std::collections::BTreeMap;
use std::time::Duration;

use super::freshness::CacheRead;

/// Metadata about one cache entry, readable without loading the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryInfo {
    pub root_id: DocumentId,
    pub generated_at: Timestamp,
    pub size_bytes: u64,
    pub format_version: String,
    /// Event time of the oldest unresolved stale mark.
    pub stale_since: Option<Timestamp>,
}

impl CacheEntryInfo {
    /// Age of the entry at `now`; zero if `generated_at` lies in the future.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.generated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Stale when marked, written by another format version, or older than
    /// `max_age`.
    pub fn is_stale_at(&self, max_age: Duration, now: Timestamp) -> bool {
        self.stale_since.is_some()
            || self.format_version != TREE_FORMAT_VERSION
            || self.age_at(now) > max_age
    }
}

/// Result of writing a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No entry existed for the root.
    Inserted,
    /// The previous entry was older (or as old) and has been replaced.
    Replaced,
    /// The stored entry was generated later; the write was dropped.
    Superseded,
}

impl PutOutcome {
    pub fn was_written(&self) -> bool {
        !matches!(self, PutOutcome::Superseded)
    }
}

/// Keyed store of materialized trees.
///
/// `put` must be atomic with respect to `get`: a reader sees either the whole
/// previous tree or the whole new one. Concurrent writers for the same root
/// resolve by `generated_at`, the later build wins.
#[async_trait]
pub trait TreeCacheStore: Send + Sync {
    /// Cached tree for `root_id`, if any.
    async fn get(&self, root_id: &DocumentId) -> LexResult<Option<MaterializedTree>>;

    /// Upsert by root id. Clears the stale mark when no recorded mutation is
    /// newer than the tree.
    async fn put(&self, tree: &MaterializedTree) -> LexResult<PutOutcome>;

    /// Flag the root as stale because of a mutation at `marked_at`.
    ///
    /// Returns `true` only on a fresh-to-stale transition. Marking an already
    /// stale root returns `false` but still records `marked_at`, so a later
    /// `put` clears the mark only if it was generated after every mutation.
    async fn mark_stale(&self, root_id: &DocumentId, marked_at: Timestamp) -> LexResult<bool>;

    /// Entry metadata for `root_id`, if an entry exists.
    async fn entry(&self, root_id: &DocumentId) -> LexResult<Option<CacheEntryInfo>>;

    /// Metadata of every entry.
    async fn list_entries(&self) -> LexResult<Vec<CacheEntryInfo>>;

    /// Administrative removal of an entry and its stale mark.
    async fn purge(&self, root_id: &DocumentId) -> LexResult<bool>;

    async fn stats(&self) -> LexResult<CacheStats>;

    /// Whether the entry for `root_id` exists and is stale.
    async fn is_stale(&self, root_id: &DocumentId, max_age: Duration) -> LexResult<bool> {
        Ok(self
            .entry(root_id)
            .await?
            .is_some_and(|e| e.is_stale_at(max_age, Utc::now())))
    }

    /// Tree plus staleness in one call.
    async fn read(&self, root_id: &DocumentId, max_age: Duration) -> LexResult<Option<CacheRead>> {
        let Some(tree) = self.get(root_id).await? else {
            return Ok(None);
        };
        let stale = self.is_stale(root_id, max_age).await?;
        Ok(Some(CacheRead::from_cache(tree, stale)))
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Entries currently carrying a stale mark.
    pub marked_stale: u64,
    /// Sum of the serialized tree sizes.
    pub total_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Append-only log of invalidation marks.
///
/// Each appended mark receives a strictly increasing sequence number, which
/// consumers use as a watermark to read only what they have not seen.
#[async_trait]
pub trait InvalidationLog: Send + Sync {
    /// Append a mark and return its sequence number (starting at 1).
    async fn append(&self, mark: &InvalidationMark) -> LexResult<u64>;

    /// Marks with a sequence number greater than `sequence`, in order.
    async fn marks_after(&self, sequence: u64) -> LexResult<Vec<(u64, InvalidationMark)>>;

    /// Sequence number of the latest mark, 0 when empty.
    async fn latest_sequence(&self) -> LexResult<u64>;

    /// Every mark recorded for `root_id`, oldest first.
    async fn marks_for(&self, root_id: &DocumentId) -> LexResult<Vec<InvalidationMark>> {
        Ok(self
            .marks_after(0)
            .await?
            .into_iter()
            .map(|(_, mark)| mark)
            .filter(|mark| &mark.root_id == root_id)
            .collect())
    }

    /// Mark counts per reason for marks triggered at or after `since`.
    async fn counts_by_reason(
        &self,
        since: Timestamp,
    ) -> LexResult<BTreeMap<InvalidationReason, u64>> {
        let mut counts = BTreeMap::new();
        for (_, mark) in self.marks_after(0).await? {
            if mark.triggered_at >= since {
                *counts.entry(mark.reason).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn info(age_secs: i64, stale: bool, version: &str) -> (CacheEntryInfo, Timestamp) {
        let now = Utc::now();
        (
            CacheEntryInfo {
                root_id: DocumentId::new("R"),
                generated_at: now - ChronoDuration::seconds(age_secs),
                size_bytes: 10,
                format_version: version.to_string(),
                stale_since: stale.then_some(now),
            },
            now,
        )
    }

    #[test]
    fn test_staleness_by_age() {
        let (fresh, now) = info(10, false, TREE_FORMAT_VERSION);
        assert!(!fresh.is_stale_at(Duration::from_secs(60), now));
        let (old, now) = info(120, false, TREE_FORMAT_VERSION);
        assert!(old.is_stale_at(Duration::from_secs(60), now));
    }

    #[test]
    fn test_staleness_by_mark_and_format() {
        let (marked, now) = info(0, true, TREE_FORMAT_VERSION);
        assert!(marked.is_stale_at(Duration::from_secs(3600), now));
        let (legacy, now) = info(0, false, "1.0");
        assert!(legacy.is_stale_at(Duration::from_secs(3600), now));
    }

    #[test]
    fn test_future_generated_at_has_zero_age() {
        let (entry, now) = info(-30, false, TREE_FORMAT_VERSION);
        assert_eq!(entry.age_at(now), Duration::ZERO);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
