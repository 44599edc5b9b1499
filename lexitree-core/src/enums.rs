//! Enum types for lexitree documents and cache events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// DOCUMENT ENUMS
// ============================================================================

/// Structural kind of a document record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Top-level instrument (code or text) rooting a hierarchy.
    Container,
    /// Structural node (book, title, chapter...).
    Section,
    /// Leaf provision.
    Article,
}

impl DocumentKind {
    /// Convert to the doctype token used by the flat store.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DocumentKind::Container => "texte",
            DocumentKind::Section => "section",
            DocumentKind::Article => "article",
        }
    }

    /// Parse from the flat store's doctype token.
    pub fn from_db_str(s: &str) -> Result<Self, DocumentKindParseError> {
        match s.to_lowercase().as_str() {
            "texte" | "texte_version" | "container" => Ok(DocumentKind::Container),
            "section" => Ok(DocumentKind::Section),
            "article" => Ok(DocumentKind::Article),
            _ => Err(DocumentKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DocumentKind {
    type Err = DocumentKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid document kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentKindParseError(pub String);

impl fmt::Display for DocumentKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid document kind: {}", self.0)
    }
}

impl std::error::Error for DocumentKindParseError {}

/// Lifecycle state of a document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    InForce,
    Superseded,
    Repealed,
}

impl DocumentState {
    /// Convert to the state token used by the upstream feed.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DocumentState::InForce => "VIGUEUR",
            DocumentState::Superseded => "MODIFIE",
            DocumentState::Repealed => "ABROGE",
        }
    }

    /// Parse from the upstream feed's state token.
    ///
    /// The feed carries a few spellings for the same state (`VIGUEUR_DIFF`,
    /// `MODIFIE_MORT_NE`, `ABROGE_DIFF`, ...); they are folded onto the three
    /// lifecycle states by prefix.
    pub fn from_db_str(s: &str) -> Result<Self, DocumentStateParseError> {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "IN_FORCE" | "IN-FORCE" => return Ok(DocumentState::InForce),
            "SUPERSEDED" => return Ok(DocumentState::Superseded),
            "REPEALED" => return Ok(DocumentState::Repealed),
            _ => {}
        }
        if upper.starts_with("VIGUEUR") {
            Ok(DocumentState::InForce)
        } else if upper.starts_with("MODIFIE") || upper == "PERIME" || upper == "TRANSFERE" {
            Ok(DocumentState::Superseded)
        } else if upper.starts_with("ABROGE") || upper == "ANNULE" || upper == "DISJOINT" {
            Ok(DocumentState::Repealed)
        } else {
            Err(DocumentStateParseError(s.to_string()))
        }
    }

    pub fn is_in_force(&self) -> bool {
        matches!(self, DocumentState::InForce)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DocumentState {
    type Err = DocumentStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid document state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStateParseError(pub String);

impl fmt::Display for DocumentStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid document state: {}", self.0)
    }
}

impl std::error::Error for DocumentStateParseError {}

// ============================================================================
// CACHE ENUMS
// ============================================================================

/// Cause recorded on an invalidation mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    SectionChanged,
    ArticleChanged,
    ContainerChanged,
}

impl InvalidationReason {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            InvalidationReason::SectionChanged => "section_changed",
            InvalidationReason::ArticleChanged => "article_changed",
            InvalidationReason::ContainerChanged => "container_changed",
        }
    }

    /// Reason matching the kind of the mutated document.
    pub fn for_kind(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Container => InvalidationReason::ContainerChanged,
            DocumentKind::Section => InvalidationReason::SectionChanged,
            DocumentKind::Article => InvalidationReason::ArticleChanged,
        }
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Where a tree view was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    /// The materialized tree in the cache store.
    Cache,
    /// A tree built on demand for this request.
    Build,
    /// A cached tree served because the document store was unreachable.
    StaleFallback,
}
