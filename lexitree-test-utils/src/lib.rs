//! lexitree Test Utilities
//!
//! Centralized test infrastructure for the lexitree workspace:
//! - Proptest generators for documents and trees
//! - A fault-injecting document store
//! - Test fixtures for the common corpus shapes
//! - Custom assertions for lexitree-specific validation

// Re-export in-memory backends from their source crate
pub use lexitree_storage::{
    DocumentStore, InMemoryDocumentStore, InMemoryInvalidationLog, InMemoryTreeCache,
    InvalidationLog, TreeCacheStore,
};

// Re-export core types for convenience
pub use lexitree_core::{
    ArticleRef, Document, DocumentId, DocumentKind, DocumentState, EngineConfig, LexError,
    LexResult, MaterializedTree, MutationNotice, RootScope, RootSummary, StorageError, Timestamp,
    TreeNode, TreeView, ValidationError, ValidityRange, TREE_FORMAT_VERSION,
};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Wraps an [`InMemoryDocumentStore`] and injects failures and latency.
///
/// - `fail_next_batches(n)`: the next `n` batched lookups report the store
///   as unavailable, then lookups succeed again.
/// - `fail_for(id)`: any lookup touching `id` reports the store as
///   unavailable, every time.
/// - `with_delay(d)`: every lookup sleeps `d` first.
#[derive(Debug)]
pub struct FaultyDocumentStore {
    inner: Arc<InMemoryDocumentStore>,
    failing_batches: AtomicU32,
    failing_ids: Mutex<HashSet<DocumentId>>,
    delay: Option<Duration>,
}

impl FaultyDocumentStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            inner,
            failing_batches: AtomicU32::new(0),
            failing_ids: Mutex::new(HashSet::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &Arc<InMemoryDocumentStore> {
        &self.inner
    }

    pub fn fail_next_batches(&self, count: u32) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    pub fn fail_for(&self, id: impl Into<DocumentId>) {
        if let Ok(mut ids) = self.failing_ids.lock() {
            ids.insert(id.into());
        }
    }

    async fn before_lookup(&self, ids: &[DocumentId]) -> LexResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let poisoned = self
            .failing_ids
            .lock()
            .map(|failing| ids.iter().any(|id| failing.contains(id)))
            .unwrap_or(false);
        if poisoned {
            return Err(unavailable("injected failure for id"));
        }
        Ok(())
    }
}

fn unavailable(reason: &str) -> LexError {
    StorageError::UpstreamUnavailable {
        reason: reason.to_string(),
    }
    .into()
}

#[async_trait]
impl DocumentStore for FaultyDocumentStore {
    async fn get_document(&self, id: &DocumentId) -> LexResult<Option<Document>> {
        self.before_lookup(std::slice::from_ref(id)).await?;
        self.inner.get_document(id).await
    }

    async fn get_documents_by_ids(&self, ids: &[DocumentId]) -> LexResult<Vec<Document>> {
        self.before_lookup(ids).await?;
        let remaining = self.failing_batches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_batches.store(remaining - 1, Ordering::SeqCst);
            return Err(unavailable("injected batch failure"));
        }
        self.inner.get_documents_by_ids(ids).await
    }

    async fn get_children_candidates(
        &self,
        logical_number: &str,
        parent_id: &DocumentId,
    ) -> LexResult<Vec<Document>> {
        self.before_lookup(std::slice::from_ref(parent_id)).await?;
        self.inner
            .get_children_candidates(logical_number, parent_id)
            .await
    }

    async fn list_root_summaries(&self, scope: &RootScope) -> LexResult<Vec<RootSummary>> {
        self.inner.list_root_summaries(scope).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for documents, version sets and trees.

    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;

    /// Dates between 1990 and 2040.
    pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (0i64..18_262).prop_map(|offset| {
            fixtures::date(1990, 1, 1) + chrono::Duration::days(offset)
        })
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (946_684_800i64..2_000_000_000i64)
            .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now))
    }

    pub fn arb_document_state() -> impl Strategy<Value = DocumentState> {
        prop_oneof![
            Just(DocumentState::InForce),
            Just(DocumentState::Superseded),
            Just(DocumentState::Repealed),
        ]
    }

    /// Well-formed ranges, open-ended about a third of the time.
    pub fn arb_validity_range() -> impl Strategy<Value = ValidityRange> {
        (arb_date(), prop::option::weighted(0.66, 1i64..3650)).prop_map(|(start, len)| {
            ValidityRange::new(Some(start), len.map(|days| start + chrono::Duration::days(days)))
        })
    }

    /// Versions of one article: distinct ids, shared number and parent.
    pub fn arb_version_set(max_versions: usize) -> impl Strategy<Value = Vec<Document>> {
        prop::collection::vec(
            (arb_validity_range(), arb_document_state(), arb_timestamp()),
            1..=max_versions.max(1),
        )
        .prop_map(|versions| {
            versions
                .into_iter()
                .enumerate()
                .map(|(i, (validity, state, modified))| {
                    let mut doc = fixtures::article(&format!("LEGIARTI{:06}", i), "S", "L1");
                    doc.validity = validity;
                    doc.state = state;
                    doc.last_modified = modified;
                    doc
                })
                .collect()
        })
    }

    /// A container with `1..=max_sections` sections per level, `levels` deep,
    /// and `0..=max_articles` articles per section. Every document is in force.
    pub fn arb_corpus(
        levels: usize,
        max_sections: usize,
        max_articles: usize,
    ) -> impl Strategy<Value = Vec<Document>> {
        prop::collection::vec(
            (1..=max_sections.max(1), 0..=max_articles),
            levels.max(1),
        )
        .prop_map(|shape| fixtures::uniform_corpus("R", &shape))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built documents and corpora for common scenarios.

    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use lexitree_core::MAX_TREE_DEPTH;

    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
    }

    /// Fixed modification time used by fixtures, shifted by `offset_secs`.
    pub fn modified(offset_secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_600_000_000 + offset_secs, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn ids(raw: &[&str]) -> Vec<DocumentId> {
        raw.iter().map(|id| DocumentId::new(*id)).collect()
    }

    fn base(id: &str, kind: DocumentKind, parent: Option<&str>, title: &str) -> Document {
        Document {
            id: DocumentId::new(id),
            kind,
            parent_id: parent.map(DocumentId::new),
            children_section_ids: Vec::new(),
            children_article_ids: Vec::new(),
            validity: ValidityRange::open_from(date(2000, 1, 1)),
            state: DocumentState::InForce,
            logical_number: None,
            title: title.to_string(),
            last_modified: modified(0),
            metadata: None,
        }
    }

    pub fn container(id: &str, title: &str, sections: &[&str], articles: &[&str]) -> Document {
        let mut doc = base(id, DocumentKind::Container, None, title);
        doc.children_section_ids = ids(sections);
        doc.children_article_ids = ids(articles);
        doc.metadata = Some(serde_json::json!({ "nature": "CODE" }));
        doc
    }

    pub fn section(id: &str, parent: &str, sections: &[&str], articles: &[&str]) -> Document {
        let mut doc = base(id, DocumentKind::Section, Some(parent), &format!("Section {}", id));
        doc.children_section_ids = ids(sections);
        doc.children_article_ids = ids(articles);
        doc
    }

    pub fn article(id: &str, parent: &str, number: &str) -> Document {
        let mut doc = base(id, DocumentKind::Article, Some(parent), &format!("Article {}", number));
        doc.logical_number = Some(number.to_string());
        doc
    }

    /// Root `R` with sections `S1`, `S2`, each holding three articles.
    pub fn two_by_three_corpus() -> Vec<Document> {
        vec![
            container("R", "Code de test", &["S1", "S2"], &[]),
            section("S1", "R", &[], &["A11", "A12", "A13"]),
            section("S2", "R", &[], &["A21", "A22", "A23"]),
            article("A11", "S1", "L1"),
            article("A12", "S1", "L2"),
            article("A13", "S1", "L3"),
            article("A21", "S2", "L4"),
            article("A22", "S2", "L5"),
            article("A23", "S2", "L6"),
        ]
    }

    /// Two versions of article `L1` under `S1`: `V1` in force
    /// 2010-01-01..2015-01-01, `V2` from 2015-01-01 onward.
    pub fn two_version_article() -> Vec<Document> {
        let mut v1 = article("V1", "S1", "L1");
        v1.validity = ValidityRange::new(Some(date(2010, 1, 1)), Some(date(2015, 1, 1)));
        v1.state = DocumentState::Superseded;
        v1.last_modified = modified(-1_000);

        let mut v2 = article("V2", "S1", "L1");
        v2.validity = ValidityRange::open_from(date(2015, 1, 1));
        v2.state = DocumentState::InForce;
        v2.last_modified = modified(1_000);

        vec![v1, v2]
    }

    /// Root `R` whose section `S1` lists both versions of `L1`.
    pub fn versioned_corpus() -> Vec<Document> {
        let mut docs = vec![
            container("R", "Code versionné", &["S1"], &[]),
            section("S1", "R", &[], &["V1", "V2"]),
        ];
        docs.extend(two_version_article());
        docs
    }

    /// Container `C` with chain `S -> S2 -> A`, and an unrelated container
    /// `U` with section `U1` and article `UA`.
    pub fn invalidation_corpus() -> Vec<Document> {
        vec![
            container("C", "Code civil", &["S"], &[]),
            section("S", "C", &["S2"], &[]),
            section("S2", "S", &[], &["A"]),
            article("A", "S2", "1"),
            container("U", "Code unrelated", &["U1"], &[]),
            section("U1", "U", &[], &["UA"]),
            article("UA", "U1", "1"),
        ]
    }

    /// Container `C` with a section chain deeper than [`MAX_TREE_DEPTH`].
    pub fn deep_chain_corpus() -> Vec<Document> {
        let depth = MAX_TREE_DEPTH + 3;
        let mut docs = vec![container("C", "Deep", &["D1"], &[])];
        for level in 1..=depth {
            let id = format!("D{}", level);
            let parent = if level == 1 { "C".to_string() } else { format!("D{}", level - 1) };
            let next = format!("D{}", level + 1);
            let children: Vec<&str> = if level < depth { vec![next.as_str()] } else { Vec::new() };
            docs.push(section(&id, &parent, &children, &[]));
        }
        docs
    }

    /// Root `R` where `S1` and `S2` reference each other.
    pub fn cyclic_corpus() -> Vec<Document> {
        vec![
            container("R", "Cyclic", &["S1"], &[]),
            section("S1", "R", &["S2"], &["A1"]),
            section("S2", "S1", &["S1"], &[]),
            article("A1", "S1", "1"),
        ]
    }

    /// Corpus of uniform fan-out under `root`. `shape[l]` gives
    /// `(sections per parent, articles per section)` for level `l + 1`.
    pub fn uniform_corpus(root: &str, shape: &[(usize, usize)]) -> Vec<Document> {
        let mut docs = Vec::new();
        let mut parents = vec![root.to_string()];
        let mut parent_docs: Vec<Document> = vec![container(root, "Generated", &[], &[])];

        for (level, (sections, articles)) in shape.iter().enumerate() {
            let mut next_parents = Vec::new();
            let mut next_docs = Vec::new();
            for (p_idx, parent) in parents.iter().enumerate() {
                for s in 0..*sections {
                    let id = format!("S{}_{}_{}", level + 1, p_idx, s);
                    let mut sec = section(&id, parent, &[], &[]);
                    for a in 0..*articles {
                        let art_id = format!("A_{}_{}", id, a);
                        sec.children_article_ids.push(DocumentId::new(art_id.clone()));
                        docs.push(article(&art_id, &id, &format!("{}-{}", id, a)));
                    }
                    parent_docs[p_idx]
                        .children_section_ids
                        .push(DocumentId::new(id.clone()));
                    next_parents.push(id);
                    next_docs.push(sec);
                }
            }
            docs.append(&mut parent_docs);
            parents = next_parents;
            parent_docs = next_docs;
        }
        docs.append(&mut parent_docs);
        docs
    }

    pub fn store_with(docs: Vec<Document>) -> Arc<InMemoryDocumentStore> {
        Arc::new(InMemoryDocumentStore::with_documents(docs))
    }

    pub fn notice(id: &str, kind: DocumentKind, parent: Option<&str>) -> MutationNotice {
        MutationNotice {
            document_id: DocumentId::new(id),
            kind,
            parent_id: parent.map(DocumentId::new),
            event_time: Utc::now(),
        }
    }

    /// Minimal one-node tree, for cache tests that don't care about shape.
    pub fn single_node_tree(root: &str, generated_at: Timestamp) -> MaterializedTree {
        MaterializedTree {
            root_id: DocumentId::new(root),
            root: TreeNode {
                id: DocumentId::new(root),
                title: root.to_string(),
                child_count_sections: 0,
                child_count_articles: 0,
                children: Vec::new(),
                articles: Vec::new(),
            },
            max_depth: MAX_TREE_DEPTH,
            format_version: TREE_FORMAT_VERSION.to_string(),
            generated_at,
            size_bytes: 0,
            build_duration_ms: 0,
            section_count: 0,
            article_count: 0,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for lexitree results and trees.

    use super::*;

    pub fn assert_ok<T: std::fmt::Debug>(result: &LexResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    pub fn assert_err<T: std::fmt::Debug>(result: &LexResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    pub fn assert_not_found<T: std::fmt::Debug>(result: &LexResult<T>) {
        match result {
            Err(e) if e.is_not_found() => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    pub fn assert_upstream_unavailable<T: std::fmt::Debug>(result: &LexResult<T>) {
        match result {
            Err(e) if e.is_upstream_unavailable() => {}
            other => panic!("Expected UpstreamUnavailable error, got: {:?}", other),
        }
    }

    /// Expect a validation error on `field`.
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &LexResult<T>, field: &str) {
        match result {
            Err(LexError::Validation(ValidationError::OutOfRange { field: f, .. }))
            | Err(LexError::Validation(ValidationError::InvalidValue { field: f, .. }))
            | Err(LexError::Validation(ValidationError::MalformedDate { field: f, .. })) => {
                assert_eq!(f, field, "Validation error on wrong field");
            }
            other => panic!("Expected Validation error on {}, got: {:?}", field, other),
        }
    }

    /// Ids of the nodes in a view's top-level page.
    pub fn item_ids(view: &TreeView) -> Vec<&str> {
        view.items.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn article_ids(node: &TreeNode) -> Vec<&str> {
        node.articles.iter().map(|a| a.id.as_str()).collect()
    }

    /// Every node's counts cover what it actually carries.
    pub fn assert_counts_cover_contents(node: &TreeNode) {
        assert!(
            node.child_count_sections >= node.children.len(),
            "Node {} reports {} sections but carries {}",
            node.id,
            node.child_count_sections,
            node.children.len()
        );
        assert!(
            node.child_count_articles >= node.articles.len(),
            "Node {} reports {} articles but carries {}",
            node.id,
            node.child_count_articles,
            node.articles.len()
        );
        for child in &node.children {
            assert_counts_cover_contents(child);
        }
    }

    /// No level below `node` exceeds `max_levels`.
    pub fn assert_height_at_most(node: &TreeNode, max_levels: usize) {
        assert!(
            node.height() <= max_levels,
            "Tree under {} is {} levels deep, limit {}",
            node.id,
            node.height(),
            max_levels
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_corpus_shape() {
        let docs = fixtures::uniform_corpus("R", &[(2, 1), (3, 0)]);
        let sections = docs.iter().filter(|d| d.kind == DocumentKind::Section).count();
        let articles = docs.iter().filter(|d| d.kind == DocumentKind::Article).count();
        assert_eq!(sections, 2 + 6);
        assert_eq!(articles, 2);
        let root = docs.iter().find(|d| d.id.as_str() == "R").unwrap();
        assert_eq!(root.children_section_ids.len(), 2);
    }

    #[test]
    fn test_deep_chain_exceeds_limit() {
        let docs = fixtures::deep_chain_corpus();
        assert!(docs.len() > lexitree_core::MAX_TREE_DEPTH + 1);
    }

    #[tokio::test]
    async fn test_faulty_store_recovers_after_injected_batches() {
        let store = FaultyDocumentStore::new(fixtures::store_with(fixtures::two_by_three_corpus()));
        store.fail_next_batches(1);
        let ids = vec![DocumentId::new("S1")];
        assert!(store.get_documents_by_ids(&ids).await.is_err());
        assert_eq!(store.get_documents_by_ids(&ids).await.unwrap().len(), 1);
    }
}
