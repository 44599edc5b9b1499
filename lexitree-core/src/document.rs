//! Flat store records and the views derived from them

use crate::{open_ended_sentinel, DocumentId, DocumentKind, DocumentState, Timestamp};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// VALIDITY
// ============================================================================

/// Half-open date range `[start, end)` during which a version is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ValidityRange {
    /// `None` means unbounded below.
    pub start: Option<NaiveDate>,
    /// `None`, or any date on or after 2999-01-01, means open-ended.
    pub end: Option<NaiveDate>,
}

impl ValidityRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Range starting at `start` with no end.
    pub fn open_from(start: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn is_open_ended(&self) -> bool {
        match self.end {
            None => true,
            Some(end) => end >= open_ended_sentinel(),
        }
    }

    /// A range whose start is not before its end can never match.
    pub fn is_malformed(&self) -> bool {
        match (self.start, self.effective_end()) {
            (Some(start), Some(end)) => start >= end,
            _ => false,
        }
    }

    fn effective_end(&self) -> Option<NaiveDate> {
        if self.is_open_ended() {
            None
        } else {
            self.end
        }
    }

    /// Whether `date` falls inside `[start, end)`.
    pub fn contains(&self, date: NaiveDate) -> bool {
        if self.is_malformed() {
            return false;
        }
        let after_start = self.start.map_or(true, |start| date >= start);
        let before_end = self.effective_end().map_or(true, |end| date < end);
        after_start && before_end
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// One version of a container, section or article as stored in the flat table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub kind: DocumentKind,
    /// `None` only for top-level containers.
    pub parent_id: Option<DocumentId>,
    /// Canonical display order; may contain duplicates.
    pub children_section_ids: Vec<DocumentId>,
    pub children_article_ids: Vec<DocumentId>,
    pub validity: ValidityRange,
    pub state: DocumentState,
    /// Human-facing designation shared by all versions of the same entity.
    pub logical_number: Option<String>,
    pub title: String,
    pub last_modified: Timestamp,
    /// Descriptive fields the model does not name (nature, origin, ...).
    pub metadata: Option<serde_json::Value>,
}

impl Document {
    pub fn is_in_force(&self) -> bool {
        self.state.is_in_force()
    }

    /// Value of a string field of the opaque metadata, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Result of resolving the authoritative version of a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentView {
    pub document: Document,
    /// Reference date used, `None` for the current-version policy.
    pub as_of: Option<NaiveDate>,
    /// Number of distinct candidate versions the resolver considered.
    pub candidates_considered: usize,
}

// ============================================================================
// WRITE-PATH AND LISTING TYPES
// ============================================================================

/// Notification emitted by the ingestion side when a document changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationNotice {
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub parent_id: Option<DocumentId>,
    pub event_time: Timestamp,
}

/// Row of the container summary table used for root listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSummary {
    pub root_id: DocumentId,
    pub title: String,
    /// Instrument nature, e.g. `CODE`, `LOI`, `DECRET`.
    pub nature: Option<String>,
    pub state: DocumentState,
    pub section_count: u64,
    pub article_count: u64,
}

impl RootSummary {
    /// Codes are recognised by nature or, failing that, by title.
    pub fn is_code(&self) -> bool {
        let nature_is_code = self
            .nature
            .as_deref()
            .is_some_and(|n| n.to_uppercase().contains("CODE"));
        nature_is_code || self.title.to_lowercase().contains("code")
    }
}

/// Filter applied when listing roots.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RootScope {
    pub codes_only: bool,
    pub state: Option<DocumentState>,
    pub limit: Option<usize>,
}

impl RootScope {
    /// Codes currently in force, the default listing.
    pub fn codes_in_force() -> Self {
        Self {
            codes_only: true,
            state: Some(DocumentState::InForce),
            limit: None,
        }
    }

    pub fn matches(&self, summary: &RootSummary) -> bool {
        if self.codes_only && !summary.is_code() {
            return false;
        }
        self.state.map_or(true, |state| summary.state == state)
    }

    /// Filter, order by section then article count descending, and limit.
    pub fn apply(&self, summaries: Vec<RootSummary>) -> Vec<RootSummary> {
        let mut selected: Vec<RootSummary> =
            summaries.into_iter().filter(|s| self.matches(s)).collect();
        selected.sort_by(|a, b| {
            b.section_count
                .cmp(&a.section_count)
                .then(b.article_count.cmp(&a.article_count))
                .then(a.root_id.cmp(&b.root_id))
        });
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_range_is_half_open() {
        let range = ValidityRange::new(Some(date(2010, 1, 1)), Some(date(2020, 1, 1)));
        assert!(range.contains(date(2010, 1, 1)));
        assert!(range.contains(date(2019, 12, 31)));
        assert!(!range.contains(date(2020, 1, 1)));
        assert!(!range.contains(date(2009, 12, 31)));
    }

    #[test]
    fn test_sentinel_end_is_open_ended() {
        let range = ValidityRange::new(Some(date(2020, 1, 1)), Some(date(2999, 1, 1)));
        assert!(range.is_open_ended());
        assert!(range.contains(date(3500, 6, 1)));
    }

    #[test]
    fn test_null_bounds() {
        let unbounded = ValidityRange::default();
        assert!(unbounded.contains(date(1800, 1, 1)));
        let until = ValidityRange::new(None, Some(date(2000, 1, 1)));
        assert!(until.contains(date(1999, 1, 1)));
        assert!(!until.contains(date(2000, 1, 1)));
    }

    #[test]
    fn test_malformed_range_never_matches() {
        let inverted = ValidityRange::new(Some(date(2020, 1, 1)), Some(date(2010, 1, 1)));
        assert!(inverted.is_malformed());
        assert!(!inverted.contains(date(2015, 1, 1)));
        let empty = ValidityRange::new(Some(date(2020, 1, 1)), Some(date(2020, 1, 1)));
        assert!(!empty.contains(date(2020, 1, 1)));
    }

    fn summary(id: &str, title: &str, nature: Option<&str>, sections: u64) -> RootSummary {
        RootSummary {
            root_id: DocumentId::new(id),
            title: title.to_string(),
            nature: nature.map(str::to_string),
            state: DocumentState::InForce,
            section_count: sections,
            article_count: 0,
        }
    }

    #[test]
    fn test_root_scope_filters_codes_and_orders_by_size() {
        let rows = vec![
            summary("A", "Code civil", Some("CODE"), 10),
            summary("B", "Loi n° 78-17", Some("LOI"), 50),
            summary("C", "Code de commerce", None, 30),
        ];
        let listed = RootScope::codes_in_force().apply(rows);
        let ids: Vec<&str> = listed.iter().map(|s| s.root_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A"]);
    }
}
