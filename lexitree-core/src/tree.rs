//! Materialized trees, the views cut from them, and invalidation marks

use crate::{
    compute_content_hash, new_mark_id, DocumentId, InvalidationReason, MarkId, ServedFrom,
    Timestamp,
};
use serde::{Deserialize, Serialize};

/// Serialization layout version of cached trees. Entries written with a
/// different version are treated as stale.
pub const TREE_FORMAT_VERSION: &str = "2.0";

/// Article leaf carried by a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArticleRef {
    pub id: DocumentId,
    pub number: Option<String>,
    pub title: String,
}

/// One node of a materialized tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: DocumentId,
    pub title: String,
    /// Resolved, deduplicated section children, whether or not they are expanded.
    pub child_count_sections: usize,
    /// Resolved, deduplicated article children, whether or not they are listed.
    pub child_count_articles: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub articles: Vec<ArticleRef>,
}

impl TreeNode {
    /// Depth of the deepest section below this node (0 for a leaf).
    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.height() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Depth-first search for a descendant (or self) with the given id.
    /// Returns the node and its level relative to `self`.
    pub fn find(&self, id: &DocumentId) -> Option<(&TreeNode, usize)> {
        if &self.id == id {
            return Some((self, 0));
        }
        self.children
            .iter()
            .find_map(|c| c.find(id).map(|(node, level)| (node, level + 1)))
    }

    /// Number of section nodes in this subtree, excluding `self`.
    pub fn section_total(&self) -> usize {
        self.children.iter().map(|c| 1 + c.section_total()).sum()
    }

    /// Number of article refs in this subtree, including `self`.
    pub fn article_total(&self) -> usize {
        self.articles.len() + self.children.iter().map(TreeNode::article_total).sum::<usize>()
    }
}

/// Full-depth tree of one container, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedTree {
    pub root_id: DocumentId,
    pub root: TreeNode,
    /// Deepest section level the build was allowed to expand.
    pub max_depth: usize,
    pub format_version: String,
    /// Captured when the build started reading the document store.
    pub generated_at: Timestamp,
    pub size_bytes: u64,
    pub build_duration_ms: u64,
    pub section_count: usize,
    pub article_count: usize,
}

impl MaterializedTree {
    pub fn title(&self) -> &str {
        &self.root.title
    }

    /// Hex SHA-256 of the node content. Stable across rebuilds of unchanged
    /// data since timestamps live outside the nodes.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.root).unwrap_or_default();
        hex::encode(compute_content_hash(&bytes))
    }

    pub fn is_current_format(&self) -> bool {
        self.format_version == TREE_FORMAT_VERSION
    }
}

/// Depth-limited, paginated view derived from a materialized tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeView {
    pub root_id: DocumentId,
    pub title: String,
    /// Sub-root the view was cut from, when one was requested.
    pub sub_root_id: Option<DocumentId>,
    pub depth: usize,
    pub include_articles: bool,
    pub page: usize,
    pub per_page: usize,
    /// Total number of top-level items across all pages.
    pub total: usize,
    pub total_pages: usize,
    pub items: Vec<TreeNode>,
    /// Articles attached directly to the requested (sub-)root.
    pub articles: Vec<ArticleRef>,
    pub generated_at: Timestamp,
    pub served_from: ServedFrom,
    /// The tree behind the view was stale when served: marked, written by
    /// another format version, past the staleness threshold, or a fallback.
    pub stale: bool,
}

/// Append-only audit record of a cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMark {
    pub mark_id: MarkId,
    pub root_id: DocumentId,
    pub reason: InvalidationReason,
    pub triggered_at: Timestamp,
    pub source_document_id: DocumentId,
}

impl InvalidationMark {
    pub fn new(
        root_id: DocumentId,
        reason: InvalidationReason,
        triggered_at: Timestamp,
        source_document_id: DocumentId,
    ) -> Self {
        Self {
            mark_id: new_mark_id(),
            root_id,
            reason,
            triggered_at,
            source_document_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> TreeNode {
        TreeNode {
            id: DocumentId::new(id),
            title: id.to_string(),
            child_count_sections: 0,
            child_count_articles: 0,
            children: Vec::new(),
            articles: Vec::new(),
        }
    }

    #[test]
    fn test_find_reports_level() {
        let mut mid = leaf("S1");
        mid.children.push(leaf("S1.1"));
        let mut root = leaf("R");
        root.children.push(mid);
        root.children.push(leaf("S2"));

        let (node, level) = root.find(&DocumentId::new("S1.1")).unwrap();
        assert_eq!(node.id.as_str(), "S1.1");
        assert_eq!(level, 2);
        assert!(root.find(&DocumentId::new("missing")).is_none());
        assert_eq!(root.height(), 2);
        assert_eq!(root.section_total(), 3);
    }

    #[test]
    fn test_empty_children_are_not_serialized() {
        let json = serde_json::to_value(leaf("S")).unwrap();
        assert!(json.get("children").is_none());
        assert!(json.get("articles").is_none());
        let back: TreeNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, leaf("S"));
    }
}
