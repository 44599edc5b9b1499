//! In-memory tree cache and invalidation log.

use async_trait::async_trait;
use lexitree_core::{DocumentId, InvalidationMark, LexResult, MaterializedTree, Timestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{CacheEntryInfo, CacheStats, InvalidationLog, PutOutcome, TreeCacheStore};

/// First and latest event time of the unresolved marks on a root.
#[derive(Debug, Clone, Copy)]
struct StaleMark {
    first: Timestamp,
    latest: Timestamp,
}

#[derive(Debug, Default)]
struct CacheState {
    // Arc so that a put swaps a pointer instead of copying under the lock.
    trees: HashMap<DocumentId, Arc<MaterializedTree>>,
    stale_marks: HashMap<DocumentId, StaleMark>,
}

/// Tree cache held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTreeCache {
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn info(
        tree: &MaterializedTree,
        stale_marks: &HashMap<DocumentId, StaleMark>,
    ) -> CacheEntryInfo {
        CacheEntryInfo {
            root_id: tree.root_id.clone(),
            generated_at: tree.generated_at,
            size_bytes: tree.size_bytes,
            format_version: tree.format_version.clone(),
            stale_since: stale_marks.get(&tree.root_id).map(|mark| mark.first),
        }
    }
}

#[async_trait]
impl TreeCacheStore for InMemoryTreeCache {
    async fn get(&self, root_id: &DocumentId) -> LexResult<Option<MaterializedTree>> {
        let state = self.state.read().await;
        match state.trees.get(root_id) {
            Some(tree) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(tree.as_ref().clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, tree: &MaterializedTree) -> LexResult<PutOutcome> {
        let mut state = self.state.write().await;
        let outcome = match state.trees.get(&tree.root_id) {
            Some(existing) if existing.generated_at > tree.generated_at => {
                return Ok(PutOutcome::Superseded);
            }
            Some(_) => PutOutcome::Replaced,
            None => PutOutcome::Inserted,
        };
        state
            .trees
            .insert(tree.root_id.clone(), Arc::new(tree.clone()));
        if state
            .stale_marks
            .get(&tree.root_id)
            .is_some_and(|mark| mark.latest <= tree.generated_at)
        {
            state.stale_marks.remove(&tree.root_id);
        }
        Ok(outcome)
    }

    async fn mark_stale(&self, root_id: &DocumentId, marked_at: Timestamp) -> LexResult<bool> {
        let mut state = self.state.write().await;
        if let Some(mark) = state.stale_marks.get_mut(root_id) {
            mark.first = mark.first.min(marked_at);
            mark.latest = mark.latest.max(marked_at);
            return Ok(false);
        }
        state.stale_marks.insert(
            root_id.clone(),
            StaleMark {
                first: marked_at,
                latest: marked_at,
            },
        );
        Ok(true)
    }

    async fn entry(&self, root_id: &DocumentId) -> LexResult<Option<CacheEntryInfo>> {
        let state = self.state.read().await;
        Ok(state
            .trees
            .get(root_id)
            .map(|tree| Self::info(tree, &state.stale_marks)))
    }

    async fn list_entries(&self) -> LexResult<Vec<CacheEntryInfo>> {
        let state = self.state.read().await;
        Ok(state
            .trees
            .values()
            .map(|tree| Self::info(tree, &state.stale_marks))
            .collect())
    }

    async fn purge(&self, root_id: &DocumentId) -> LexResult<bool> {
        let mut state = self.state.write().await;
        state.stale_marks.remove(root_id);
        Ok(state.trees.remove(root_id).is_some())
    }

    async fn stats(&self) -> LexResult<CacheStats> {
        let state = self.state.read().await;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: state.trees.len() as u64,
            marked_stale: state
                .trees
                .keys()
                .filter(|id| state.stale_marks.contains_key(*id))
                .count() as u64,
            total_bytes: state.trees.values().map(|t| t.size_bytes).sum(),
        })
    }
}

/// Invalidation log held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryInvalidationLog {
    marks: RwLock<Vec<InvalidationMark>>,
}

impl InMemoryInvalidationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.marks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.marks.read().await.is_empty()
    }
}

#[async_trait]
impl InvalidationLog for InMemoryInvalidationLog {
    async fn append(&self, mark: &InvalidationMark) -> LexResult<u64> {
        let mut marks = self.marks.write().await;
        marks.push(mark.clone());
        Ok(marks.len() as u64)
    }

    async fn marks_after(&self, sequence: u64) -> LexResult<Vec<(u64, InvalidationMark)>> {
        let marks = self.marks.read().await;
        Ok(marks
            .iter()
            .enumerate()
            .map(|(idx, mark)| (idx as u64 + 1, mark))
            .filter(|(seq, _)| *seq > sequence)
            .map(|(seq, mark)| (seq, mark.clone()))
            .collect())
    }

    async fn latest_sequence(&self) -> LexResult<u64> {
        Ok(self.marks.read().await.len() as u64)
    }
}
