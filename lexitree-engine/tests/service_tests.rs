//! Read Service Tests
//!
//! Tree reads through the cache, on-demand builds, historical views,
//! fallback on store outage, and authoritative document lookups.

use lexitree_core::{DocumentState, RootScope, ServedFrom, ValidityRange};
use lexitree_engine::{TreeRequest, TreeService};
use lexitree_test_utils::assertions::{
    article_ids, assert_not_found, assert_upstream_unavailable, assert_validation_error, item_ids,
};
use lexitree_test_utils::fixtures::{self, store_with};
use lexitree_test_utils::{
    DocumentId, EngineConfig, InMemoryDocumentStore, InMemoryTreeCache, TreeCacheStore,
};
use std::sync::Arc;

struct Harness {
    store: Arc<InMemoryDocumentStore>,
    cache: Arc<InMemoryTreeCache>,
    service: TreeService,
}

fn harness(docs: Vec<lexitree_core::Document>) -> Harness {
    let store = store_with(docs);
    let cache = Arc::new(InMemoryTreeCache::new());
    let service = TreeService::new(store.clone(), cache.clone(), EngineConfig::default()).unwrap();
    Harness {
        store,
        cache,
        service,
    }
}

// ============================================================================
// TREE READS
// ============================================================================

#[tokio::test]
async fn test_depth_one_reports_article_counts() {
    let h = harness(fixtures::two_by_three_corpus());

    let view = h.service.get_tree(&TreeRequest::new("R", 1)).await.unwrap();

    assert_eq!(item_ids(&view), vec!["S1", "S2"]);
    for item in &view.items {
        assert_eq!(item.child_count_articles, 3);
        assert!(item.articles.is_empty());
        assert!(item.children.is_empty());
    }
    assert_eq!(view.total, 2);
    assert_eq!(view.total_pages, 1);
    assert_eq!(view.served_from, ServedFrom::Build);
}

#[tokio::test]
async fn test_depth_two_with_articles_lists_refs() {
    let h = harness(fixtures::two_by_three_corpus());

    let view = h
        .service
        .get_tree(&TreeRequest::new("R", 2).with_articles(true))
        .await
        .unwrap();

    assert_eq!(article_ids(&view.items[0]), vec!["A11", "A12", "A13"]);
    assert_eq!(article_ids(&view.items[1]), vec!["A21", "A22", "A23"]);
}

#[tokio::test]
async fn test_miss_is_persisted_then_served_from_cache() {
    let h = harness(fixtures::two_by_three_corpus());
    let root = DocumentId::new("R");

    let first = h.service.get_tree(&TreeRequest::new("R", 1)).await.unwrap();
    h.service.flush_pending_writes().await;
    assert!(h.cache.get(&root).await.unwrap().is_some());

    h.store.reset_counters();
    let second = h.service.get_tree(&TreeRequest::new("R", 1)).await.unwrap();
    assert_eq!(second.served_from, ServedFrom::Cache);
    assert!(!second.stale);
    assert_eq!(second.items, first.items);
    assert_eq!(h.store.batch_lookups(), 0);
    assert_eq!(h.store.single_lookups(), 0);
}

#[tokio::test]
async fn test_marked_entry_is_served_flagged_stale() {
    let h = harness(fixtures::two_by_three_corpus());
    let root = DocumentId::new("R");
    h.service.get_tree(&TreeRequest::new("R", 1)).await.unwrap();
    h.service.flush_pending_writes().await;
    h.cache.mark_stale(&root, chrono::Utc::now()).await.unwrap();

    let view = h.service.get_tree(&TreeRequest::new("R", 1)).await.unwrap();
    assert_eq!(view.served_from, ServedFrom::Cache);
    assert!(view.stale);
}

#[tokio::test]
async fn test_bypass_rebuilds_even_when_cached() {
    let h = harness(fixtures::two_by_three_corpus());
    h.service.get_tree(&TreeRequest::new("R", 1)).await.unwrap();
    h.service.flush_pending_writes().await;

    let view = h
        .service
        .get_tree(&TreeRequest::new("R", 1).bypassing_cache())
        .await
        .unwrap();
    assert_eq!(view.served_from, ServedFrom::Build);
}

#[tokio::test]
async fn test_out_of_range_requests_rejected_before_any_lookup() {
    let h = harness(fixtures::two_by_three_corpus());

    let too_shallow = h.service.get_tree(&TreeRequest::new("R", 0)).await;
    assert_validation_error(&too_shallow, "depth");

    let too_deep = h.service.get_tree(&TreeRequest::new("R", 11)).await;
    assert_validation_error(&too_deep, "depth");

    let huge_page = h
        .service
        .get_tree(&TreeRequest::new("R", 1).with_page(1, 501))
        .await;
    assert_validation_error(&huge_page, "per_page");

    let page_zero = h
        .service
        .get_tree(&TreeRequest::new("R", 1).with_page(0, 10))
        .await;
    assert_validation_error(&page_zero, "page");

    assert_eq!(h.store.single_lookups(), 0);
    assert_eq!(h.cache.list_entries().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_page_past_end_is_empty() {
    let h = harness(fixtures::two_by_three_corpus());

    let view = h
        .service
        .get_tree(&TreeRequest::new("R", 1).with_page(100, 10))
        .await
        .unwrap();
    assert!(view.items.is_empty());
    assert_eq!(view.total, 2);
}

#[tokio::test]
async fn test_pagination_splits_siblings() {
    let h = harness(fixtures::uniform_corpus("R", &[(5, 0)]));

    let page_one = h
        .service
        .get_tree(&TreeRequest::new("R", 1).with_page(1, 2))
        .await
        .unwrap();
    let page_three = h
        .service
        .get_tree(&TreeRequest::new("R", 1).with_page(3, 2))
        .await
        .unwrap();

    assert_eq!(page_one.items.len(), 2);
    assert_eq!(page_three.items.len(), 1);
    assert_eq!(page_one.total_pages, 3);
}

#[tokio::test]
async fn test_sub_root_view() {
    let h = harness(fixtures::invalidation_corpus());

    let view = h
        .service
        .get_tree(&TreeRequest::new("C", 2).with_articles(true).with_root_section("S"))
        .await
        .unwrap();
    assert_eq!(view.sub_root_id, Some(DocumentId::new("S")));
    assert_eq!(item_ids(&view), vec!["S2"]);
    assert_eq!(article_ids(&view.items[0]), vec!["A"]);

    let missing = h
        .service
        .get_tree(&TreeRequest::new("C", 1).with_root_section("NOPE"))
        .await;
    assert_not_found(&missing);
}

#[tokio::test]
async fn test_unknown_root_is_not_found() {
    let h = harness(fixtures::two_by_three_corpus());
    let result = h.service.get_tree(&TreeRequest::new("NOPE", 1)).await;
    assert_not_found(&result);
}

// ============================================================================
// HISTORICAL READS
// ============================================================================

#[tokio::test]
async fn test_historical_view_is_never_cached() {
    let h = harness(fixtures::versioned_corpus());
    let request = TreeRequest::new("R", 2)
        .with_articles(true)
        .with_as_of(fixtures::date(2012, 3, 1));

    let view = h.service.get_tree(&request).await.unwrap();
    h.service.flush_pending_writes().await;

    assert_eq!(article_ids(&view.items[0]), vec!["V1"]);
    assert_eq!(view.served_from, ServedFrom::Build);
    assert!(h.cache.get(&DocumentId::new("R")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_historical_read_ignores_current_cache() {
    let h = harness(fixtures::versioned_corpus());
    h.service
        .get_tree(&TreeRequest::new("R", 2).with_articles(true))
        .await
        .unwrap();
    h.service.flush_pending_writes().await;

    let past = h
        .service
        .get_tree(
            &TreeRequest::new("R", 2)
                .with_articles(true)
                .with_as_of(fixtures::date(2012, 3, 1)),
        )
        .await
        .unwrap();
    assert_eq!(article_ids(&past.items[0]), vec!["V1"]);
}

#[tokio::test]
async fn test_historical_counts_agree_across_depths() {
    let mut repealed = fixtures::section("X", "S1", &[], &[]);
    repealed.validity =
        ValidityRange::new(Some(fixtures::date(2000, 1, 1)), Some(fixtures::date(2010, 1, 1)));
    repealed.state = DocumentState::Repealed;
    let h = harness(vec![
        fixtures::container("R", "Code historique", &["S1"], &[]),
        fixtures::section("S1", "R", &["X", "Y"], &[]),
        repealed,
        fixtures::section("Y", "S1", &[], &[]),
    ]);
    let as_of = fixtures::date(2015, 6, 1);

    let shallow = h
        .service
        .get_tree(&TreeRequest::new("R", 1).with_as_of(as_of))
        .await
        .unwrap();
    let deep = h
        .service
        .get_tree(&TreeRequest::new("R", 2).with_as_of(as_of))
        .await
        .unwrap();

    assert!(shallow.items[0].children.is_empty());
    assert_eq!(shallow.items[0].child_count_sections, 1);
    assert_eq!(deep.items[0].child_count_sections, 1);
    let children: Vec<&str> = deep.items[0].children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(children, vec!["Y"]);
}

// ============================================================================
// STORE OUTAGE
// ============================================================================

#[tokio::test]
async fn test_outage_serves_cached_tree_as_fallback() {
    let h = harness(fixtures::two_by_three_corpus());
    h.service.get_tree(&TreeRequest::new("R", 1)).await.unwrap();
    h.service.flush_pending_writes().await;
    h.cache
        .mark_stale(&DocumentId::new("R"), chrono::Utc::now())
        .await
        .unwrap();

    h.store.set_offline(true);
    let view = h
        .service
        .get_tree(&TreeRequest::new("R", 1).bypassing_cache())
        .await
        .unwrap();

    assert_eq!(view.served_from, ServedFrom::StaleFallback);
    assert!(view.stale);
    assert_eq!(item_ids(&view), vec!["S1", "S2"]);
}

#[tokio::test]
async fn test_outage_without_cache_fails_retryably() {
    let h = harness(fixtures::two_by_three_corpus());
    h.store.set_offline(true);

    let result = h.service.get_tree(&TreeRequest::new("R", 1)).await;
    assert_upstream_unavailable(&result);
    assert!(result.unwrap_err().is_retryable());
}

// ============================================================================
// DOCUMENTS AND ROOTS
// ============================================================================

#[tokio::test]
async fn test_authoritative_document_follows_policy() {
    let h = harness(fixtures::versioned_corpus());
    let v1 = DocumentId::new("V1");

    let current = h.service.get_authoritative_document(&v1, None).await.unwrap();
    assert_eq!(current.document.id.as_str(), "V2");
    assert_eq!(current.candidates_considered, 2);

    let past = h
        .service
        .get_authoritative_document(&v1, Some(fixtures::date(2012, 3, 1)))
        .await
        .unwrap();
    assert_eq!(past.document.id.as_str(), "V1");
    assert_eq!(past.as_of, Some(fixtures::date(2012, 3, 1)));
}

#[tokio::test]
async fn test_authoritative_document_not_found() {
    let h = harness(fixtures::versioned_corpus());

    let unknown = h
        .service
        .get_authoritative_document(&DocumentId::new("NOPE"), None)
        .await;
    assert_not_found(&unknown);

    let before_any_version = h
        .service
        .get_authoritative_document(&DocumentId::new("V1"), Some(fixtures::date(1999, 1, 1)))
        .await;
    assert_not_found(&before_any_version);
}

#[tokio::test]
async fn test_list_roots_and_purge() {
    let h = harness(fixtures::invalidation_corpus());

    let roots = h.service.list_roots(&RootScope::default()).await.unwrap();
    let ids: Vec<&str> = roots.iter().map(|r| r.root_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"C") && ids.contains(&"U"));

    h.service.get_tree(&TreeRequest::new("C", 1)).await.unwrap();
    h.service.flush_pending_writes().await;
    assert!(h.service.purge(&DocumentId::new("C")).await.unwrap());
    assert!(!h.service.purge(&DocumentId::new("C")).await.unwrap());
    assert_eq!(h.service.cache_stats().await.unwrap().entry_count, 0);
}
