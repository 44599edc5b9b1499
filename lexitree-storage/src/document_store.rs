//! Document Store Adapter contract and its in-memory implementation.
//!
//! The flat document table is owned by the ingestion side; lexitree only reads
//! it. Every lookup the tree builder needs is expressed here so that builds can
//! run against PostgreSQL in production and against [`InMemoryDocumentStore`]
//! in tests.

use async_trait::async_trait;
use lexitree_core::{
    Document, DocumentId, DocumentKind, LexResult, RootScope, RootSummary, StorageError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

/// Read-only query surface over the flat document table.
///
/// Implementations must be thread-safe; builds for different roots call into
/// the same adapter concurrently.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Most recently modified row stored under `id`, if any.
    async fn get_document(&self, id: &DocumentId) -> LexResult<Option<Document>>;

    /// Every row stored under any of `ids`, in no particular order.
    ///
    /// Duplicate ingestions of the same id are all returned; callers resolve
    /// them. Unknown ids are silently absent.
    async fn get_documents_by_ids(&self, ids: &[DocumentId]) -> LexResult<Vec<Document>>;

    /// All historical versions of the entity numbered `logical_number` under
    /// `parent_id`.
    async fn get_children_candidates(
        &self,
        logical_number: &str,
        parent_id: &DocumentId,
    ) -> LexResult<Vec<Document>>;

    /// Container summaries from the separately maintained summary table.
    async fn list_root_summaries(&self, scope: &RootScope) -> LexResult<Vec<RootSummary>>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory document store for tests and local tooling.
///
/// Keeps every inserted row, including duplicates of an id, counts queries,
/// and can be switched offline to simulate an unreachable database.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    rows: RwLock<HashMap<DocumentId, Vec<Document>>>,
    summaries: RwLock<Vec<RootSummary>>,
    offline: AtomicBool,
    single_lookups: AtomicU64,
    batch_lookups: AtomicU64,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `docs`.
    pub fn with_documents(docs: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        for doc in docs {
            store.insert_row(doc);
        }
        store
    }

    /// Append a row. Rows with an existing id are kept alongside the old ones,
    /// the way a duplicate ingestion would leave them.
    pub fn insert_row(&self, doc: Document) {
        if let Ok(mut rows) = self.rows.write() {
            rows.entry(doc.id.clone()).or_default().push(doc);
        }
    }

    /// Replace every row stored under the document's id.
    pub fn upsert(&self, doc: Document) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(doc.id.clone(), vec![doc]);
        }
    }

    pub fn remove(&self, id: &DocumentId) -> bool {
        self.rows
            .write()
            .map(|mut rows| rows.remove(id).is_some())
            .unwrap_or(false)
    }

    pub fn set_summaries(&self, summaries: Vec<RootSummary>) {
        if let Ok(mut current) = self.summaries.write() {
            *current = summaries;
        }
    }

    /// Simulate the database going away (`true`) or coming back (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `get_documents_by_ids` calls served so far.
    pub fn batch_lookups(&self) -> u64 {
        self.batch_lookups.load(Ordering::SeqCst)
    }

    /// Number of `get_document` calls served so far.
    pub fn single_lookups(&self) -> u64 {
        self.single_lookups.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.batch_lookups.store(0, Ordering::SeqCst);
        self.single_lookups.store(0, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> LexResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::UpstreamUnavailable {
                reason: "in-memory store set offline".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Summaries derived from the containers held, for stores that were not
    /// given an explicit summary table.
    fn derived_summaries(rows: &HashMap<DocumentId, Vec<Document>>) -> Vec<RootSummary> {
        rows.values()
            .filter_map(|versions| versions.iter().max_by_key(|d| d.last_modified))
            .filter(|doc| doc.kind == DocumentKind::Container)
            .map(|doc| {
                let sections: HashSet<&DocumentId> = doc.children_section_ids.iter().collect();
                let articles: HashSet<&DocumentId> = doc.children_article_ids.iter().collect();
                RootSummary {
                    root_id: doc.id.clone(),
                    title: doc.title.clone(),
                    nature: doc.metadata_str("nature").map(str::to_string),
                    state: doc.state,
                    section_count: sections.len() as u64,
                    article_count: articles.len() as u64,
                }
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, id: &DocumentId) -> LexResult<Option<Document>> {
        self.ensure_online()?;
        self.single_lookups.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows
            .get(id)
            .and_then(|versions| versions.iter().max_by_key(|d| d.last_modified))
            .cloned())
    }

    async fn get_documents_by_ids(&self, ids: &[DocumentId]) -> LexResult<Vec<Document>> {
        self.ensure_online()?;
        self.batch_lookups.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        let wanted: HashSet<&DocumentId> = ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| rows.get(id))
            .flat_map(|versions| versions.iter().cloned())
            .collect())
    }

    async fn get_children_candidates(
        &self,
        logical_number: &str,
        parent_id: &DocumentId,
    ) -> LexResult<Vec<Document>> {
        self.ensure_online()?;
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows
            .values()
            .flatten()
            .filter(|doc| {
                doc.parent_id.as_ref() == Some(parent_id)
                    && doc.logical_number.as_deref() == Some(logical_number)
            })
            .cloned()
            .collect())
    }

    async fn list_root_summaries(&self, scope: &RootScope) -> LexResult<Vec<RootSummary>> {
        self.ensure_online()?;
        let explicit = self
            .summaries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .clone();
        let summaries = if explicit.is_empty() {
            let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
            Self::derived_summaries(&rows)
        } else {
            explicit
        };
        Ok(scope.apply(summaries))
    }
}
