//! Read Service
//!
//! The read contract exposed to callers: tree views, authoritative document
//! lookups and root listings.
//!
//! Tree reads go to the cache first. On a miss the tree is built in the
//! calling task, served, and persisted in the background. When the document
//! store is unavailable a cached tree is served even if stale.

use crate::builder::{BuildOptions, TreeBuilder};
use chrono::NaiveDate;
use lexitree_core::{
    truncate, DocumentId, DocumentKind, DocumentView, EngineConfig, LexResult, MaterializedTree,
    RootScope, RootSummary, ServedFrom, StorageError, TreeView, TruncateRequest, VersionPolicy,
    VersionResolver,
};
use lexitree_storage::{CacheRead, CacheStats, DocumentStore, TreeCacheStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Parameters of a tree read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRequest {
    pub root_id: DocumentId,
    pub depth: usize,
    pub include_articles: bool,
    /// Section to use as the top of the view instead of the root.
    pub root_section_id: Option<DocumentId>,
    pub page: usize,
    /// Falls back to `EngineConfig::default_per_page`.
    pub per_page: Option<usize>,
    pub as_of: Option<NaiveDate>,
    /// Skip the cache and build from the store.
    pub bypass_cache: bool,
}

impl TreeRequest {
    pub fn new(root_id: impl Into<DocumentId>, depth: usize) -> Self {
        Self {
            root_id: root_id.into(),
            depth,
            include_articles: false,
            root_section_id: None,
            page: 1,
            per_page: None,
            as_of: None,
            bypass_cache: false,
        }
    }

    pub fn with_articles(mut self, include_articles: bool) -> Self {
        self.include_articles = include_articles;
        self
    }

    pub fn with_root_section(mut self, section_id: impl Into<DocumentId>) -> Self {
        self.root_section_id = Some(section_id.into());
        self
    }

    pub fn with_page(mut self, page: usize, per_page: usize) -> Self {
        self.page = page;
        self.per_page = Some(per_page);
        self
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    fn truncate_request(&self, default_per_page: usize) -> TruncateRequest {
        TruncateRequest {
            depth: self.depth,
            page: self.page,
            per_page: self.per_page.unwrap_or(default_per_page),
            include_articles: self.include_articles,
            root_section_id: self.root_section_id.clone(),
        }
    }
}

pub struct TreeService {
    builder: TreeBuilder,
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn TreeCacheStore>,
    resolver: VersionResolver,
    config: EngineConfig,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl TreeService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn TreeCacheStore>,
        config: EngineConfig,
    ) -> LexResult<Self> {
        config.validate()?;
        Ok(Self {
            builder: TreeBuilder::new(Arc::clone(&store), &config),
            resolver: VersionResolver::new(config.tie_break),
            store,
            cache,
            config,
            pending_writes: Mutex::new(Vec::new()),
        })
    }

    pub fn builder(&self) -> &TreeBuilder {
        &self.builder
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Depth-limited, paginated view of a container's tree.
    pub async fn get_tree(&self, request: &TreeRequest) -> LexResult<TreeView> {
        let view_request = request.truncate_request(self.config.default_per_page);
        view_request.validate(self.config.max_depth)?;

        if let Some(as_of) = request.as_of {
            return self.historical_view(request, &view_request, as_of).await;
        }

        let cached = if request.bypass_cache {
            None
        } else {
            self.cached_read(&request.root_id).await
        };
        if let Some(read) = cached.as_ref().filter(|r| r.tree().max_depth >= request.depth) {
            let mut view = truncate(read.tree(), &view_request, ServedFrom::Cache)?;
            if read.is_stale() {
                tracing::debug!(
                    root_id = %request.root_id,
                    age_secs = read.age().as_secs(),
                    "Serving stale cached tree until the next sweep"
                );
                view.stale = true;
            }
            return Ok(view);
        }

        match self
            .builder
            .build(&request.root_id, &BuildOptions::full().with_max_depth(self.config.max_depth))
            .await
        {
            Ok(tree) => {
                let view = truncate(&tree, &view_request, ServedFrom::Build)?;
                self.persist_in_background(tree).await;
                Ok(view)
            }
            Err(e) if e.is_upstream_unavailable() => {
                let fallback = match cached {
                    Some(read) => Some(read),
                    None => self.cached_read(&request.root_id).await,
                };
                let Some(tree) = fallback
                    .map(CacheRead::into_tree)
                    .filter(|t| t.max_depth >= request.depth)
                else {
                    return Err(e);
                };
                tracing::warn!(
                    root_id = %request.root_id,
                    generated_at = %tree.generated_at,
                    error = %e,
                    "Document store unavailable, serving cached tree"
                );
                truncate(&tree, &view_request, ServedFrom::StaleFallback)
            }
            Err(e) => Err(e),
        }
    }

    /// Historical views are built for the date and never cached.
    ///
    /// The build goes one level past the requested depth so the deepest
    /// returned nodes carry version-resolved counts, not cutoff counts.
    async fn historical_view(
        &self,
        request: &TreeRequest,
        view_request: &TruncateRequest,
        as_of: NaiveDate,
    ) -> LexResult<TreeView> {
        let build_depth = if request.root_section_id.is_some() {
            self.config.max_depth
        } else {
            (request.depth + 1).min(self.config.max_depth)
        };
        let options = BuildOptions::full()
            .with_max_depth(build_depth)
            .with_as_of(Some(as_of));
        let tree = self.builder.build(&request.root_id, &options).await?;
        truncate(&tree, view_request, ServedFrom::Build)
    }

    async fn cached_read(&self, root_id: &DocumentId) -> Option<CacheRead> {
        match self.cache.read(root_id, self.config.stale_after).await {
            Ok(read) => read,
            Err(e) => {
                tracing::warn!(root_id = %root_id, error = %e, "Cache read failed, building instead");
                None
            }
        }
    }

    async fn persist_in_background(&self, tree: MaterializedTree) {
        let cache = Arc::clone(&self.cache);
        let handle = tokio::spawn(async move {
            match cache.put(&tree).await {
                Ok(outcome) => tracing::debug!(
                    root_id = %tree.root_id,
                    outcome = ?outcome,
                    "Persisted on-demand build"
                ),
                Err(e) => tracing::error!(
                    root_id = %tree.root_id,
                    error = %e,
                    "Failed to persist on-demand build"
                ),
            }
        });
        let mut pending = self.pending_writes.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for background cache writes started by earlier reads.
    pub async fn flush_pending_writes(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_writes.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background cache write aborted");
            }
        }
    }

    /// The version of `id`'s logical entity in force now, or at `as_of`.
    ///
    /// Candidates are every stored version sharing the document's logical
    /// number under the same parent, plus the rows of `id` itself.
    pub async fn get_authoritative_document(
        &self,
        id: &DocumentId,
        as_of: Option<NaiveDate>,
    ) -> LexResult<DocumentView> {
        let document = self
            .store
            .get_document(id)
            .await?
            .ok_or_else(|| StorageError::not_found("document", id))?;

        let mut candidates = self.store.get_documents_by_ids(std::slice::from_ref(id)).await?;
        if let (Some(number), Some(parent)) = (&document.logical_number, &document.parent_id) {
            let siblings = self.store.get_children_candidates(number, parent).await?;
            candidates.extend(siblings.into_iter().filter(|c| c.kind == document.kind));
        }
        if document.kind == DocumentKind::Container {
            candidates.retain(|c| c.kind == DocumentKind::Container);
        }

        let policy = VersionPolicy::from_as_of(as_of);
        let candidates_considered = VersionResolver::dedup_by_id(&candidates).len();
        let resolved = self
            .resolver
            .resolve_required(&candidates, policy, id.as_str())?;

        Ok(DocumentView {
            document: resolved.clone(),
            as_of,
            candidates_considered,
        })
    }

    pub async fn list_roots(&self, scope: &RootScope) -> LexResult<Vec<RootSummary>> {
        self.store.list_root_summaries(scope).await
    }

    /// Remove a root's cached tree. Returns whether an entry existed.
    pub async fn purge(&self, root_id: &DocumentId) -> LexResult<bool> {
        let removed = self.cache.purge(root_id).await?;
        tracing::info!(root_id = %root_id, removed, "Purged cache entry");
        Ok(removed)
    }

    pub async fn cache_stats(&self) -> LexResult<CacheStats> {
        self.cache.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_per_page_from_config() {
        let request = TreeRequest::new("R", 2);
        let truncated = request.truncate_request(50);
        assert_eq!(truncated.per_page, 50);
        assert_eq!(truncated.page, 1);
        assert!(!truncated.include_articles);

        let explicit = TreeRequest::new("R", 2).with_page(3, 10).truncate_request(50);
        assert_eq!(explicit.per_page, 10);
        assert_eq!(explicit.page, 3);
    }
}
