//! Tree Builder
//!
//! Turns the flat, parent-linked document table into a nested tree for one
//! container.
//!
//! # Responsibility
//!
//! - Expand sections breadth-first, one batched lookup per level.
//! - Resolve every referenced section and article to its authoritative
//!   version before its children or counts are used.
//! - Omit (and log) nodes that cannot be resolved instead of failing.
//!
//! # Invariants
//!
//! - Levels are loaded strictly in order; level `n + 1` ids come from level
//!   `n` results.
//! - Expansion stops at `max_depth`, so cyclic references terminate.
//! - An id already requested at a shallower level is never fetched again.
//! - Child lists are deduplicated preserving first-seen order.
//! - Nothing is written anywhere: the caller owns persistence.

use chrono::{NaiveDate, Utc};
use lexitree_core::{
    ArticleRef, BuildError, Document, DocumentId, DocumentKind, EngineConfig, LexResult,
    MaterializedTree, StorageError, TreeNode, VersionPolicy, VersionResolver, MAX_TREE_DEPTH,
    TREE_FORMAT_VERSION,
};
use lexitree_storage::DocumentStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Section levels to expand below the root, at most [`MAX_TREE_DEPTH`].
    pub max_depth: usize,
    /// Historical reference date applied uniformly to the whole tree.
    pub as_of: Option<NaiveDate>,
    pub include_articles: bool,
}

impl BuildOptions {
    /// Full-depth, current-version build with articles; what the cache stores.
    pub fn full() -> Self {
        Self {
            max_depth: MAX_TREE_DEPTH,
            as_of: None,
            include_articles: true,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_as_of(mut self, as_of: Option<NaiveDate>) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn with_articles(mut self, include_articles: bool) -> Self {
        self.include_articles = include_articles;
        self
    }

    pub fn policy(&self) -> VersionPolicy {
        VersionPolicy::from_as_of(self.as_of)
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::full()
    }
}

/// Counters collected during one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Section levels that issued a lookup.
    pub levels_loaded: usize,
    /// Calls made to `get_documents_by_ids`.
    pub batch_lookups: usize,
    pub sections_resolved: usize,
    pub articles_resolved: usize,
    /// Referenced ids absent from the store.
    pub missing: usize,
    /// Referenced ids present but with no admissible version.
    pub unresolved: usize,
    /// Nodes at the depth limit that still reference sections.
    pub cutoff_nodes: usize,
}

/// Builds materialized trees from a [`DocumentStore`].
#[derive(Clone)]
pub struct TreeBuilder {
    store: Arc<dyn DocumentStore>,
    resolver: VersionResolver,
    batch_size: usize,
    max_articles_per_node: usize,
}

impl TreeBuilder {
    pub fn new(store: Arc<dyn DocumentStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            resolver: VersionResolver::new(config.tie_break),
            batch_size: config.batch_size.max(1),
            max_articles_per_node: config.max_articles_per_node.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn resolver(&self) -> VersionResolver {
        self.resolver
    }

    /// Build the tree rooted at `root_id`.
    pub async fn build(
        &self,
        root_id: &DocumentId,
        options: &BuildOptions,
    ) -> LexResult<MaterializedTree> {
        self.build_with_stats(root_id, options)
            .await
            .map(|(tree, _)| tree)
    }

    /// Build, abandoning the attempt after `timeout`. Nothing is written on
    /// abandonment since the tree only exists in memory until returned.
    pub async fn build_with_timeout(
        &self,
        root_id: &DocumentId,
        options: &BuildOptions,
        timeout: Duration,
    ) -> LexResult<MaterializedTree> {
        match tokio::time::timeout(timeout, self.build(root_id, options)).await {
            Ok(result) => result,
            Err(_) => Err(BuildError::Timeout {
                root_id: root_id.to_string(),
                elapsed_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    /// Build and report what the build did.
    pub async fn build_with_stats(
        &self,
        root_id: &DocumentId,
        options: &BuildOptions,
    ) -> LexResult<(MaterializedTree, BuildStats)> {
        let generated_at = Utc::now();
        let started = Instant::now();
        let max_depth = options.max_depth.clamp(1, MAX_TREE_DEPTH);
        let policy = options.policy();
        let mut stats = BuildStats::default();

        let root = self
            .store
            .get_document(root_id)
            .await?
            .filter(|doc| doc.kind == DocumentKind::Container)
            .ok_or_else(|| StorageError::document_not_found(DocumentKind::Container, root_id))?;

        let sections = self
            .load_sections(&root, max_depth, policy, &mut stats)
            .await?;

        let articles = if options.include_articles {
            Some(self.load_articles(&root, &sections, policy, &mut stats).await?)
        } else {
            None
        };

        let assembly = Assembly {
            resolver: &self.resolver,
            sections: &sections,
            articles: articles.as_ref(),
            max_depth,
            max_articles_per_node: self.max_articles_per_node,
        };
        let mut cutoff_nodes = 0;
        let root_node = assembly.node(&root, 0, &mut cutoff_nodes);
        stats.cutoff_nodes = cutoff_nodes;

        let size_bytes = serde_json::to_vec(&root_node)
            .map_err(|e| StorageError::Serialization {
                reason: e.to_string(),
            })?
            .len() as u64;

        let tree = MaterializedTree {
            root_id: root.id.clone(),
            section_count: root_node.section_total(),
            article_count: root_node.article_total(),
            root: root_node,
            max_depth,
            format_version: TREE_FORMAT_VERSION.to_string(),
            generated_at,
            size_bytes,
            build_duration_ms: started.elapsed().as_millis() as u64,
        };

        if stats.cutoff_nodes > 0 {
            let cutoff = BuildError::DepthCutoff {
                root_id: tree.root_id.to_string(),
                depth: max_depth,
            };
            tracing::debug!(
                root_id = %tree.root_id,
                cutoff_nodes = stats.cutoff_nodes,
                reason = %cutoff,
                "Expansion stopped at depth limit"
            );
        }
        tracing::info!(
            root_id = %tree.root_id,
            as_of = ?options.as_of,
            levels = stats.levels_loaded,
            lookups = stats.batch_lookups,
            sections = tree.section_count,
            articles = tree.article_count,
            size_bytes = tree.size_bytes,
            duration_ms = tree.build_duration_ms,
            "Built tree"
        );

        Ok((tree, stats))
    }

    /// Breadth-first expansion of sections, one batched lookup per level.
    async fn load_sections(
        &self,
        root: &Document,
        max_depth: usize,
        policy: VersionPolicy,
        stats: &mut BuildStats,
    ) -> LexResult<HashMap<DocumentId, Document>> {
        let mut sections: HashMap<DocumentId, Document> = HashMap::new();
        let mut requested: HashSet<DocumentId> = HashSet::new();
        let mut frontier: Vec<DocumentId> = root.children_section_ids.clone();

        for level in 1..=max_depth {
            let to_fetch: Vec<DocumentId> = frontier
                .into_iter()
                .filter(|id| requested.insert(id.clone()))
                .collect();
            if to_fetch.is_empty() {
                break;
            }

            let rows = self.fetch(&to_fetch, stats).await?;
            let present: HashSet<DocumentId> = rows.iter().map(|d| d.id.clone()).collect();
            let mut resolved = self.resolver.resolve_each(rows, policy);
            resolved.retain(|_, doc| doc.kind == DocumentKind::Section);
            self.note_omissions(&root.id, level, "section", &to_fetch, &present, &resolved, stats);
            stats.levels_loaded = level;
            stats.sections_resolved += resolved.len();

            let mut next = Vec::new();
            if level < max_depth {
                for id in &to_fetch {
                    if let Some(doc) = resolved.get(id) {
                        next.extend(doc.children_section_ids.iter().cloned());
                    }
                }
            }
            sections.extend(resolved);
            frontier = next;
        }

        Ok(sections)
    }

    /// Resolve every article referenced by the root or a loaded section.
    async fn load_articles(
        &self,
        root: &Document,
        sections: &HashMap<DocumentId, Document>,
        policy: VersionPolicy,
        stats: &mut BuildStats,
    ) -> LexResult<HashMap<DocumentId, Document>> {
        let mut seen: HashSet<&DocumentId> = HashSet::new();
        let ids: Vec<DocumentId> = std::iter::once(root)
            .chain(sections.values())
            .flat_map(|doc| doc.children_article_ids.iter())
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = self.fetch(&ids, stats).await?;
        let present: HashSet<DocumentId> = rows.iter().map(|d| d.id.clone()).collect();
        let mut resolved = self.resolver.resolve_each(rows, policy);
        resolved.retain(|_, doc| doc.kind == DocumentKind::Article);
        self.note_omissions(&root.id, 0, "article", &ids, &present, &resolved, stats);
        stats.articles_resolved = resolved.len();
        Ok(resolved)
    }

    /// One logical lookup, split into chunks of `batch_size` ids.
    async fn fetch(&self, ids: &[DocumentId], stats: &mut BuildStats) -> LexResult<Vec<Document>> {
        let mut rows = Vec::new();
        for chunk in ids.chunks(self.batch_size) {
            stats.batch_lookups += 1;
            rows.extend(self.store.get_documents_by_ids(chunk).await?);
        }
        Ok(rows)
    }

    #[allow(clippy::too_many_arguments)]
    fn note_omissions(
        &self,
        root_id: &DocumentId,
        level: usize,
        kind: &str,
        requested: &[DocumentId],
        present: &HashSet<DocumentId>,
        resolved: &HashMap<DocumentId, Document>,
        stats: &mut BuildStats,
    ) {
        let missing: Vec<&DocumentId> = requested.iter().filter(|id| !present.contains(*id)).collect();
        let unresolved = requested
            .iter()
            .filter(|id| present.contains(*id) && !resolved.contains_key(*id))
            .count();
        stats.missing += missing.len();
        stats.unresolved += unresolved;

        if !missing.is_empty() {
            tracing::warn!(
                root_id = %root_id,
                level,
                kind,
                missing = missing.len(),
                sample = ?missing.iter().take(5).collect::<Vec<_>>(),
                "Referenced documents absent from store, omitted from tree"
            );
        }
        if unresolved > 0 {
            tracing::debug!(
                root_id = %root_id,
                level,
                kind,
                unresolved,
                "Documents without an admissible version omitted from tree"
            );
        }
    }
}

/// Ids in first-seen order with repeats removed.
pub fn dedup_ids(ids: &[DocumentId]) -> Vec<&DocumentId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(*id)).collect()
}

/// Read-only view of everything loaded, used to assemble nodes.
struct Assembly<'a> {
    resolver: &'a VersionResolver,
    sections: &'a HashMap<DocumentId, Document>,
    articles: Option<&'a HashMap<DocumentId, Document>>,
    max_depth: usize,
    max_articles_per_node: usize,
}

impl Assembly<'_> {
    /// Node for `doc` sitting at `level` (root is 0). Recursion is bounded by
    /// `max_depth`.
    fn node(&self, doc: &Document, level: usize, cutoff_nodes: &mut usize) -> TreeNode {
        let section_ids = dedup_ids(&doc.children_section_ids);
        let (children, child_count_sections) = if level < self.max_depth {
            let resolved: Vec<&Document> = section_ids
                .iter()
                .filter_map(|id| self.sections.get(*id))
                .collect();
            let kept = self.resolver.collapse_logical_duplicates(resolved);
            let count = kept.len();
            let children = kept
                .into_iter()
                .map(|child| self.node(child, level + 1, cutoff_nodes))
                .collect();
            (children, count)
        } else {
            if !section_ids.is_empty() {
                *cutoff_nodes += 1;
            }
            (Vec::new(), section_ids.len())
        };

        let article_ids = dedup_ids(&doc.children_article_ids);
        let (articles, child_count_articles) = match self.articles {
            Some(resolved_articles) => {
                let resolved: Vec<&Document> = article_ids
                    .iter()
                    .filter_map(|id| resolved_articles.get(*id))
                    .collect();
                let kept = self.resolver.collapse_logical_duplicates(resolved);
                let count = kept.len();
                // Cutoff-level nodes keep their refs too: a view rooted at
                // such a section returns them as its own articles.
                let refs = kept
                    .into_iter()
                    .take(self.max_articles_per_node)
                    .map(|article| ArticleRef {
                        id: article.id.clone(),
                        number: article.logical_number.clone(),
                        title: article.title.clone(),
                    })
                    .collect();
                (refs, count)
            }
            None => (Vec::new(), article_ids.len()),
        };

        TreeNode {
            id: doc.id.clone(),
            title: doc.title.clone(),
            child_count_sections,
            child_count_articles,
            children,
            articles,
        }
    }
}
