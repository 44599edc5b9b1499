//! Tree truncation and pagination
//!
//! Derives depth-limited views from a cached full-depth tree without touching
//! the document store.
//!
//! Depth counts levels below the requested root: its direct sections are level
//! 1, and the articles of a section at level `L` sit at level `L + 1`. A view at
//! depth `d` therefore keeps sections down to level `d` and lists articles only
//! for sections above level `d`; the root's own articles (level 1) are always
//! eligible. Counts on every node are kept, so a cut-off section still reports
//! how many children it has.

use crate::{
    DocumentId, LexResult, MaterializedTree, ServedFrom, StorageError, TreeNode, TreeView,
    ValidationError, MAX_PER_PAGE,
};
use serde::{Deserialize, Serialize};

/// Parameters of a truncated, paginated view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateRequest {
    pub depth: usize,
    /// 1-based.
    pub page: usize,
    pub per_page: usize,
    pub include_articles: bool,
    /// Cut the view from this section instead of the container.
    pub root_section_id: Option<DocumentId>,
}

impl TruncateRequest {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            page: 1,
            per_page: MAX_PER_PAGE,
            include_articles: false,
            root_section_id: None,
        }
    }

    pub fn with_page(mut self, page: usize, per_page: usize) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    pub fn with_articles(mut self, include_articles: bool) -> Self {
        self.include_articles = include_articles;
        self
    }

    pub fn with_root_section(mut self, section_id: DocumentId) -> Self {
        self.root_section_id = Some(section_id);
        self
    }

    /// Check depth against `max_depth` and the pagination bounds.
    pub fn validate(&self, max_depth: usize) -> Result<(), ValidationError> {
        validate_depth(self.depth, max_depth)?;
        validate_pagination(self.page, self.per_page)
    }
}

pub fn validate_depth(depth: usize, max_depth: usize) -> Result<(), ValidationError> {
    if depth < 1 || depth > max_depth {
        return Err(ValidationError::OutOfRange {
            field: "depth".to_string(),
            value: depth as i64,
            min: 1,
            max: max_depth as i64,
        });
    }
    Ok(())
}

pub fn validate_pagination(page: usize, per_page: usize) -> Result<(), ValidationError> {
    if page < 1 {
        return Err(ValidationError::InvalidValue {
            field: "page".to_string(),
            reason: "page numbers start at 1".to_string(),
        });
    }
    if per_page < 1 || per_page > MAX_PER_PAGE {
        return Err(ValidationError::OutOfRange {
            field: "per_page".to_string(),
            value: per_page as i64,
            min: 1,
            max: MAX_PER_PAGE as i64,
        });
    }
    Ok(())
}

/// Copy of `node` keeping `levels` section levels below it.
pub fn prune(node: &TreeNode, levels: usize, include_articles: bool) -> TreeNode {
    let children = if levels == 0 {
        Vec::new()
    } else {
        node.children
            .iter()
            .map(|c| prune(c, levels - 1, include_articles))
            .collect()
    };
    let articles = if include_articles && levels >= 1 {
        node.articles.clone()
    } else {
        Vec::new()
    };
    TreeNode {
        id: node.id.clone(),
        title: node.title.clone(),
        child_count_sections: node.child_count_sections,
        child_count_articles: node.child_count_articles,
        children,
        articles,
    }
}

/// Prefix of `tree` down to `depth`, still a valid materialized tree.
pub fn truncate_tree(tree: &MaterializedTree, depth: usize) -> LexResult<MaterializedTree> {
    validate_depth(depth, tree.max_depth)?;
    let root = prune(&tree.root, depth, true);
    Ok(MaterializedTree {
        root_id: tree.root_id.clone(),
        section_count: root.section_total(),
        article_count: root.article_total(),
        root,
        max_depth: depth,
        format_version: tree.format_version.clone(),
        generated_at: tree.generated_at,
        size_bytes: tree.size_bytes,
        build_duration_ms: tree.build_duration_ms,
    })
}

/// Derive the requested view from `tree`.
pub fn truncate(
    tree: &MaterializedTree,
    request: &TruncateRequest,
    served_from: ServedFrom,
) -> LexResult<TreeView> {
    request.validate(tree.max_depth)?;

    let start_node = match &request.root_section_id {
        None => &tree.root,
        Some(section_id) => {
            let (node, _level) = tree
                .root
                .find(section_id)
                .ok_or_else(|| StorageError::not_found("section", section_id))?;
            node
        }
    };

    let total = start_node.children.len();
    let per_page = request.per_page;
    let total_pages = total.div_ceil(per_page);
    let offset = (request.page - 1).saturating_mul(per_page);
    let items: Vec<TreeNode> = start_node
        .children
        .iter()
        .skip(offset)
        .take(per_page)
        .map(|c| prune(c, request.depth - 1, request.include_articles))
        .collect();

    let articles = if request.include_articles {
        start_node.articles.clone()
    } else {
        Vec::new()
    };

    Ok(TreeView {
        root_id: tree.root_id.clone(),
        title: tree.root.title.clone(),
        sub_root_id: request.root_section_id.clone(),
        depth: request.depth,
        include_articles: request.include_articles,
        page: request.page,
        per_page,
        total,
        total_pages,
        items,
        articles,
        generated_at: tree.generated_at,
        stale: matches!(served_from, ServedFrom::StaleFallback),
        served_from,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArticleRef, LexError, TREE_FORMAT_VERSION};
    use chrono::Utc;

    fn article(id: &str) -> ArticleRef {
        ArticleRef {
            id: DocumentId::new(id),
            number: Some(id.to_string()),
            title: format!("Article {}", id),
        }
    }

    fn section(id: &str, children: Vec<TreeNode>, articles: Vec<ArticleRef>) -> TreeNode {
        TreeNode {
            id: DocumentId::new(id),
            title: id.to_string(),
            child_count_sections: children.len(),
            child_count_articles: articles.len(),
            children,
            articles,
        }
    }

    fn tree(root: TreeNode, max_depth: usize) -> MaterializedTree {
        MaterializedTree {
            root_id: root.id.clone(),
            section_count: root.section_total(),
            article_count: root.article_total(),
            root,
            max_depth,
            format_version: TREE_FORMAT_VERSION.to_string(),
            generated_at: Utc::now(),
            size_bytes: 0,
            build_duration_ms: 0,
        }
    }

    /// Root with 2 sections of 3 articles each.
    fn two_by_three() -> MaterializedTree {
        let s1 = section("S1", vec![], vec![article("A1"), article("A2"), article("A3")]);
        let s2 = section("S2", vec![], vec![article("A4"), article("A5"), article("A6")]);
        tree(section("R", vec![s1, s2], vec![]), 10)
    }

    #[test]
    fn test_depth_one_reports_counts_without_articles() {
        let view = truncate(&two_by_three(), &TruncateRequest::new(1), ServedFrom::Cache).unwrap();
        assert_eq!(view.items.len(), 2);
        for item in &view.items {
            assert_eq!(item.child_count_articles, 3);
            assert!(item.articles.is_empty());
        }
    }

    #[test]
    fn test_depth_one_with_articles_still_hides_level_two() {
        let request = TruncateRequest::new(1).with_articles(true);
        let view = truncate(&two_by_three(), &request, ServedFrom::Cache).unwrap();
        assert!(view.items.iter().all(|s| s.articles.is_empty()));
    }

    #[test]
    fn test_depth_two_with_articles_lists_them() {
        let request = TruncateRequest::new(2).with_articles(true);
        let view = truncate(&two_by_three(), &request, ServedFrom::Cache).unwrap();
        assert_eq!(view.items.len(), 2);
        for item in &view.items {
            assert_eq!(item.articles.len(), 3);
        }
    }

    #[test]
    fn test_depth_two_without_articles_drops_them() {
        let view = truncate(&two_by_three(), &TruncateRequest::new(2), ServedFrom::Cache).unwrap();
        assert!(view.items.iter().all(|s| s.articles.is_empty()));
    }

    #[test]
    fn test_depth_out_of_range_is_validation_error() {
        let t = two_by_three();
        for depth in [0, 11] {
            let err = truncate(&t, &TruncateRequest::new(depth), ServedFrom::Cache).unwrap_err();
            assert!(matches!(
                err,
                LexError::Validation(ValidationError::OutOfRange { .. })
            ));
        }
        // Bounded by the tree's own max depth, not just the global cap.
        let shallow = tree(two_by_three().root, 3);
        assert!(truncate(&shallow, &TruncateRequest::new(4), ServedFrom::Cache).is_err());
    }

    #[test]
    fn test_pagination_bounds() {
        let t = two_by_three();
        assert!(truncate(&t, &TruncateRequest::new(1).with_page(0, 10), ServedFrom::Cache).is_err());
        assert!(truncate(&t, &TruncateRequest::new(1).with_page(1, 0), ServedFrom::Cache).is_err());
        assert!(truncate(&t, &TruncateRequest::new(1).with_page(1, 501), ServedFrom::Cache).is_err());
        assert!(truncate(&t, &TruncateRequest::new(1).with_page(1, 500), ServedFrom::Cache).is_ok());
    }

    #[test]
    fn test_page_past_end_is_empty_with_total() {
        let sections: Vec<TreeNode> = (0..7)
            .map(|i| section(&format!("S{}", i), vec![], vec![]))
            .collect();
        let t = tree(section("R", sections, vec![]), 10);
        let request = TruncateRequest::new(1).with_page(100, 3);
        let view = truncate(&t, &request, ServedFrom::Cache).unwrap();
        assert!(view.items.is_empty());
        assert_eq!(view.total, 7);
        assert_eq!(view.total_pages, 3);

        let last = truncate(&t, &TruncateRequest::new(1).with_page(3, 3), ServedFrom::Cache).unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id.as_str(), "S6");
    }

    #[test]
    fn test_sub_root_view() {
        let deep = section("S1.1", vec![], vec![article("A9")]);
        let s1 = section("S1", vec![deep], vec![]);
        let t = tree(section("R", vec![s1], vec![article("A0")]), 10);

        let request = TruncateRequest::new(1)
            .with_articles(true)
            .with_root_section(DocumentId::new("S1"));
        let view = truncate(&t, &request, ServedFrom::Build).unwrap();
        assert_eq!(view.sub_root_id, Some(DocumentId::new("S1")));
        assert_eq!(view.total, 1);
        assert_eq!(view.items[0].id.as_str(), "S1.1");
        assert!(view.articles.is_empty());

        let missing = TruncateRequest::new(1).with_root_section(DocumentId::new("nope"));
        let err = truncate(&t, &missing, ServedFrom::Cache).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_root_articles_follow_include_flag() {
        let t = tree(section("R", vec![], vec![article("A0")]), 10);
        let with = truncate(&t, &TruncateRequest::new(1).with_articles(true), ServedFrom::Cache).unwrap();
        assert_eq!(with.articles.len(), 1);
        let without = truncate(&t, &TruncateRequest::new(1), ServedFrom::Cache).unwrap();
        assert!(without.articles.is_empty());
    }

    #[test]
    fn test_truncate_tree_recounts() {
        let t = two_by_three();
        assert_eq!(t.article_count, 6);
        let prefix = truncate_tree(&t, 1).unwrap();
        assert_eq!(prefix.max_depth, 1);
        assert_eq!(prefix.section_count, 2);
        assert_eq!(prefix.article_count, 0);
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================
