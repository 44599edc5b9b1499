//! Temporal version resolution
//!
//! A logical entity (an article number under a section, a section title under
//! a code) accumulates many versions over time, each with its own identifier
//! and validity range. The upstream feed also re-ingests records, so the same
//! identifier can appear several times. Resolution picks the one version that
//! is authoritative for a reference date:
//!
//! 1. candidates sharing an `id` collapse to the most recently modified row;
//! 2. the policy filters the survivors (in force now, or valid on a date);
//! 3. the tie-break orders what is left and the greatest wins.
//!
//! Malformed or overlapping ranges never fail resolution; a malformed range
//! simply never contains a date.

use crate::{Document, DocumentId, LexResult, StorageError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// POLICY
// ============================================================================

/// Which versions are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionPolicy {
    /// Only versions in force, whatever their dates.
    Current,
    /// Versions whose validity range contains the date, whatever their state.
    AsOf(NaiveDate),
}

impl VersionPolicy {
    pub fn from_as_of(as_of: Option<NaiveDate>) -> Self {
        as_of.map_or(VersionPolicy::Current, VersionPolicy::AsOf)
    }

    pub fn as_of(&self) -> Option<NaiveDate> {
        match self {
            VersionPolicy::Current => None,
            VersionPolicy::AsOf(date) => Some(*date),
        }
    }

    pub fn admits(&self, doc: &Document) -> bool {
        match self {
            VersionPolicy::Current => doc.is_in_force(),
            VersionPolicy::AsOf(date) => doc.validity.contains(*date),
        }
    }
}

/// Ordering used when several eligible versions remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Latest `last_modified`, then latest validity start.
    #[default]
    LatestModified,
    /// Latest validity start, then latest `last_modified`.
    LatestValidityStart,
}

impl TieBreak {
    pub fn as_str(&self) -> &'static str {
        match self {
            TieBreak::LatestModified => "latest_modified",
            TieBreak::LatestValidityStart => "latest_validity_start",
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_modified = a.last_modified.cmp(&b.last_modified);
        // None sorts first, so an unbounded start loses to any dated one.
        let by_start = a.validity.start.cmp(&b.validity.start);
        let primary = match self {
            TieBreak::LatestModified => by_modified.then(by_start),
            TieBreak::LatestValidityStart => by_start.then(by_modified),
        };
        // Final key keeps the choice independent of input order.
        primary.then_with(|| b.id.cmp(&a.id))
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "latest_modified" | "last_modified" => Ok(TieBreak::LatestModified),
            "latest_validity_start" | "validity_start" => Ok(TieBreak::LatestValidityStart),
            _ => Err(format!("Invalid tie-break policy: {}", s)),
        }
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Pure resolver over candidate sets. Holds only the tie-break policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionResolver {
    tie_break: TieBreak,
}

impl VersionResolver {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Collapse rows sharing an `id` to the one with the latest
    /// `last_modified`. Output keeps the order in which ids first appear.
    pub fn dedup_by_id<'a, I>(candidates: I) -> Vec<&'a Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut position: HashMap<&DocumentId, usize> = HashMap::new();
        let mut kept: Vec<&'a Document> = Vec::new();
        for doc in candidates {
            match position.get(&doc.id) {
                Some(&idx) => {
                    if doc.last_modified > kept[idx].last_modified {
                        kept[idx] = doc;
                    }
                }
                None => {
                    position.insert(&doc.id, kept.len());
                    kept.push(doc);
                }
            }
        }
        kept
    }

    /// Select the authoritative version, or `None` when nothing qualifies.
    pub fn resolve<'a>(
        &self,
        candidates: &'a [Document],
        policy: VersionPolicy,
    ) -> Option<&'a Document> {
        self.select(Self::dedup_by_id(candidates), policy)
    }

    /// Like [`resolve`](Self::resolve) but NotFound when nothing qualifies.
    pub fn resolve_required<'a>(
        &self,
        candidates: &'a [Document],
        policy: VersionPolicy,
        logical_id: &str,
    ) -> LexResult<&'a Document> {
        self.resolve(candidates, policy)
            .ok_or_else(|| StorageError::not_found("version", logical_id).into())
    }

    fn select<'a>(&self, deduped: Vec<&'a Document>, policy: VersionPolicy) -> Option<&'a Document> {
        deduped
            .into_iter()
            .filter(|doc| policy.admits(doc))
            .max_by(|a, b| self.tie_break.compare(a, b))
    }

    /// Resolve a batch of rows keyed by `id`: each id is treated as its own
    /// candidate set (duplicate ingestions of one record). Ids with no
    /// admissible row are absent from the result.
    pub fn resolve_each(
        &self,
        rows: Vec<Document>,
        policy: VersionPolicy,
    ) -> HashMap<DocumentId, Document> {
        let mut best: HashMap<DocumentId, Document> = HashMap::new();
        for doc in rows {
            match best.get(&doc.id) {
                Some(existing) if existing.last_modified >= doc.last_modified => {}
                _ => {
                    best.insert(doc.id.clone(), doc);
                }
            }
        }
        best.retain(|_, doc| policy.admits(doc));
        best
    }

    /// Among resolved siblings, keep one version per `logical_number`.
    ///
    /// Versions of the same entity can sit side by side in a parent's child
    /// list. The survivor takes the slot of the first sibling of its group,
    /// so display order stays stable. Siblings without a number are kept.
    pub fn collapse_logical_duplicates<'a>(&self, siblings: Vec<&'a Document>) -> Vec<&'a Document> {
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        let mut out: Vec<&'a Document> = Vec::with_capacity(siblings.len());
        for doc in siblings {
            let Some(number) = doc.logical_number.as_deref().filter(|n| !n.is_empty()) else {
                out.push(doc);
                continue;
            };
            match slot_of.get(number) {
                Some(&idx) => {
                    if self.tie_break.compare(doc, out[idx]) == Ordering::Greater {
                        out[idx] = doc;
                    }
                }
                None => {
                    slot_of.insert(number, out.len());
                    out.push(doc);
                }
            }
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentKind, DocumentState, ValidityRange};
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn version(
        id: &str,
        state: DocumentState,
        validity: ValidityRange,
        modified_secs: i64,
    ) -> Document {
        Document {
            id: DocumentId::new(id),
            kind: DocumentKind::Article,
            parent_id: Some(DocumentId::new("LEGISCTA1")),
            children_section_ids: Vec::new(),
            children_article_ids: Vec::new(),
            validity,
            state,
            logical_number: Some("L. 110-1".to_string()),
            title: format!("Article {}", id),
            last_modified: Utc.timestamp_opt(modified_secs, 0).unwrap(),
            metadata: None,
        }
    }

    fn two_versions() -> Vec<Document> {
        vec![
            version(
                "LEGIARTI_NEW",
                DocumentState::InForce,
                ValidityRange::open_from(date(2020, 1, 1)),
                2_000,
            ),
            version(
                "LEGIARTI_OLD",
                DocumentState::Repealed,
                ValidityRange::new(Some(date(2010, 1, 1)), Some(date(2020, 1, 1))),
                1_000,
            ),
        ]
    }

    #[test]
    fn test_historical_date_selects_repealed_version() {
        let resolver = VersionResolver::default();
        let candidates = two_versions();
        let chosen = resolver
            .resolve(&candidates, VersionPolicy::AsOf(date(2015, 6, 1)))
            .unwrap();
        assert_eq!(chosen.id.as_str(), "LEGIARTI_OLD");
    }

    #[test]
    fn test_current_policy_selects_in_force_version() {
        let resolver = VersionResolver::default();
        let candidates = two_versions();
        let chosen = resolver.resolve(&candidates, VersionPolicy::Current).unwrap();
        assert_eq!(chosen.id.as_str(), "LEGIARTI_NEW");
    }

    #[test]
    fn test_current_policy_never_falls_back_to_repealed() {
        let resolver = VersionResolver::default();
        let candidates = vec![two_versions().remove(1)];
        assert!(resolver.resolve(&candidates, VersionPolicy::Current).is_none());
        let err = resolver
            .resolve_required(&candidates, VersionPolicy::Current, "L. 110-1")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_empty_candidate_set_is_not_found() {
        let resolver = VersionResolver::default();
        assert!(resolver.resolve(&[], VersionPolicy::Current).is_none());
        assert!(resolver
            .resolve(&[], VersionPolicy::AsOf(date(2000, 1, 1)))
            .is_none());
    }

    #[test]
    fn test_duplicate_ids_keep_latest_modified() {
        let resolver = VersionResolver::default();
        let range = ValidityRange::open_from(date(2020, 1, 1));
        let candidates = vec![
            version("A", DocumentState::InForce, range, 10),
            version("A", DocumentState::InForce, range, 30),
            version("A", DocumentState::InForce, range, 20),
        ];
        let deduped = VersionResolver::dedup_by_id(&candidates);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].last_modified.timestamp(), 30);
        let chosen = resolver.resolve(&candidates, VersionPolicy::Current).unwrap();
        assert_eq!(chosen.last_modified.timestamp(), 30);
    }

    #[test]
    fn test_latest_duplicate_decides_state() {
        // A re-ingestion that repealed the record hides the older in-force row.
        let resolver = VersionResolver::default();
        let range = ValidityRange::open_from(date(2020, 1, 1));
        let candidates = vec![
            version("A", DocumentState::InForce, range, 10),
            version("A", DocumentState::Repealed, range, 20),
        ];
        assert!(resolver.resolve(&candidates, VersionPolicy::Current).is_none());
    }

    #[test]
    fn test_overlapping_ranges_use_tie_break() {
        let range = ValidityRange::open_from(date(2018, 1, 1));
        let later_start = ValidityRange::open_from(date(2019, 1, 1));
        let candidates = vec![
            version("A", DocumentState::InForce, later_start, 10),
            version("B", DocumentState::InForce, range, 20),
        ];
        let by_modified = VersionResolver::new(TieBreak::LatestModified);
        assert_eq!(
            by_modified
                .resolve(&candidates, VersionPolicy::Current)
                .unwrap()
                .id
                .as_str(),
            "B"
        );
        let by_start = VersionResolver::new(TieBreak::LatestValidityStart);
        assert_eq!(
            by_start
                .resolve(&candidates, VersionPolicy::Current)
                .unwrap()
                .id
                .as_str(),
            "A"
        );
    }

    #[test]
    fn test_malformed_ranges_are_skipped_not_fatal() {
        let resolver = VersionResolver::default();
        let inverted = ValidityRange::new(Some(date(2020, 1, 1)), Some(date(2000, 1, 1)));
        let candidates = vec![
            version("BAD", DocumentState::Repealed, inverted, 50),
            version(
                "GOOD",
                DocumentState::Repealed,
                ValidityRange::new(None, Some(date(2030, 1, 1))),
                10,
            ),
        ];
        let chosen = resolver
            .resolve(&candidates, VersionPolicy::AsOf(date(2010, 1, 1)))
            .unwrap();
        assert_eq!(chosen.id.as_str(), "GOOD");
    }

    #[test]
    fn test_resolve_each_filters_per_id() {
        let resolver = VersionResolver::default();
        let mut rows = two_versions();
        rows.push(rows[0].clone());
        let resolved = resolver.resolve_each(rows, VersionPolicy::Current);
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key(&DocumentId::new("LEGIARTI_NEW")));
    }

    #[test]
    fn test_collapse_logical_duplicates_keeps_first_slot() {
        let resolver = VersionResolver::default();
        let range = ValidityRange::open_from(date(2020, 1, 1));
        let mut first = version("V1", DocumentState::InForce, range, 10);
        first.logical_number = Some("1".to_string());
        let mut other = version("X", DocumentState::InForce, range, 10);
        other.logical_number = Some("2".to_string());
        let mut newer = version("V2", DocumentState::InForce, range, 20);
        newer.logical_number = Some("1".to_string());
        let mut unnumbered = version("U", DocumentState::InForce, range, 5);
        unnumbered.logical_number = None;

        let out = resolver.collapse_logical_duplicates(vec![&first, &other, &newer, &unnumbered]);
        let ids: Vec<&str> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["V2", "X", "U"]);
    }

    #[test]
    fn test_tie_break_parse() {
        assert_eq!("latest_modified".parse::<TieBreak>(), Ok(TieBreak::LatestModified));
        assert_eq!(
            "VALIDITY_START".parse::<TieBreak>(),
            Ok(TieBreak::LatestValidityStart)
        );
        assert!("newest".parse::<TieBreak>().is_err());
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::{DocumentKind, DocumentState, ValidityRange};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (1990i32..2040, 1u32..=12, 1u32..=28)
            .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn arb_state() -> impl Strategy<Value = DocumentState> {
        prop_oneof![
            Just(DocumentState::InForce),
            Just(DocumentState::Superseded),
            Just(DocumentState::Repealed),
        ]
    }

    // Includes nulls, inverted ranges and the 2999 sentinel.
    fn arb_range() -> impl Strategy<Value = ValidityRange> {
        (
            proptest::option::of(arb_date()),
            prop_oneof![
                Just(None),
                arb_date().prop_map(Some),
                Just(NaiveDate::from_ymd_opt(2999, 1, 1)),
            ],
        )
            .prop_map(|(start, end)| ValidityRange::new(start, end))
    }

    fn arb_candidate() -> impl Strategy<Value = Document> {
        ("[A-E]", arb_state(), arb_range(), 0i64..10_000).prop_map(
            |(id, state, validity, modified)| Document {
                id: DocumentId::new(id),
                kind: DocumentKind::Article,
                parent_id: None,
                children_section_ids: Vec::new(),
                children_article_ids: Vec::new(),
                validity,
                state,
                logical_number: Some("1".to_string()),
                title: String::new(),
                last_modified: Utc.timestamp_opt(modified, 0).unwrap(),
                metadata: None,
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_as_of_result_contains_date(
            candidates in prop::collection::vec(arb_candidate(), 0..12),
            date in arb_date(),
        ) {
            let resolver = VersionResolver::default();
            if let Some(chosen) = resolver.resolve(&candidates, VersionPolicy::AsOf(date)) {
                prop_assert!(chosen.validity.contains(date));
                prop_assert!(candidates.iter().any(|c| std::ptr::eq(c, chosen)));
            }
        }

        #[test]
        fn prop_current_result_is_in_force(
            candidates in prop::collection::vec(arb_candidate(), 0..12),
        ) {
            let resolver = VersionResolver::default();
            if let Some(chosen) = resolver.resolve(&candidates, VersionPolicy::Current) {
                prop_assert!(chosen.is_in_force());
            }
        }

        #[test]
        fn prop_resolution_ignores_input_order(
            candidates in prop::collection::vec(arb_candidate(), 0..12),
            date in arb_date(),
        ) {
            // Distinct timestamps so that duplicate-id collapse is unambiguous.
            let mut candidates = candidates;
            for (i, c) in candidates.iter_mut().enumerate() {
                c.last_modified = Utc.timestamp_opt(i as i64 * 7 + 1, 0).unwrap();
            }
            let resolver = VersionResolver::default();
            let forward = resolver
                .resolve(&candidates, VersionPolicy::AsOf(date))
                .map(|d| (d.id.clone(), d.last_modified));
            let mut reversed = candidates.clone();
            reversed.reverse();
            let backward = resolver
                .resolve(&reversed, VersionPolicy::AsOf(date))
                .map(|d| (d.id.clone(), d.last_modified));
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn prop_duplicates_resolve_to_max_modified(
            stamps in prop::collection::hash_set(0i64..100_000, 1..10),
            range in arb_range(),
        ) {
            let template = Document {
                id: DocumentId::new("LEGIARTI_DUP"),
                kind: DocumentKind::Article,
                parent_id: None,
                children_section_ids: Vec::new(),
                children_article_ids: Vec::new(),
                validity: range,
                state: DocumentState::InForce,
                logical_number: None,
                title: String::new(),
                last_modified: Utc.timestamp_opt(0, 0).unwrap(),
                metadata: None,
            };
            let candidates: Vec<Document> = stamps
                .iter()
                .map(|s| Document {
                    last_modified: Utc.timestamp_opt(*s, 0).unwrap(),
                    ..template.clone()
                })
                .collect();
            let max = stamps.iter().copied().max().unwrap_or_default();
            let chosen = VersionResolver::default()
                .resolve(&candidates, VersionPolicy::Current)
                .unwrap();
            prop_assert_eq!(chosen.last_modified.timestamp(), max);
        }
    }
}
