//! PostgreSQL Document Store Adapter
//!
//! Reads the flat `documents` table populated by the ingestion pipeline and
//! the `code_stats` summary table. Structural fields live in the `meta` jsonb
//! column:
//!
//! | meta key | model field |
//! |---|---|
//! | `titre` | `title` |
//! | `parent` | `parent_id` |
//! | `sous_sections[].id` | `children_section_ids` |
//! | `articles[].id` | `children_article_ids` |
//! | `date_debut`, `date_fin` | `validity` |
//! | `etat` | `state` |
//! | `num` | `logical_number` |
//!
//! Everything else in `meta` is carried as opaque metadata.

use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use lexitree_core::{
    ConfigError, Document, DocumentId, DocumentKind, DocumentState, LexError, LexResult,
    RootScope, RootSummary, StorageError, Timestamp, ValidityRange,
};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

use crate::document_store::DocumentStore;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection and checkout timeout
    pub timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "legal".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("LEXITREE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("LEXITREE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("LEXITREE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("LEXITREE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("LEXITREE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("LEXITREE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("LEXITREE_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> LexResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                ConfigError::InvalidValue {
                    field: "pool".to_string(),
                    value: format!("{}:{}/{}", self.host, self.port, self.dbname),
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for PostgreSQL document store operations.
#[derive(Debug, thiserror::Error)]
pub enum PgStoreError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("Row decode error: {0}")]
    Decode(String),
}

/// Connectivity problems become `UpstreamUnavailable`; SQL errors reported by
/// the server do not.
impl From<PgStoreError> for LexError {
    fn from(e: PgStoreError) -> Self {
        let unavailable = match &e {
            PgStoreError::Pool(_) => true,
            PgStoreError::Query(err) => err.is_closed() || err.as_db_error().is_none(),
            PgStoreError::Decode(_) => false,
        };
        if unavailable {
            LexError::Storage(StorageError::UpstreamUnavailable {
                reason: e.to_string(),
            })
        } else {
            LexError::Storage(StorageError::QueryFailed {
                reason: e.to_string(),
            })
        }
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Parse a `YYYY-MM-DD` date from the feed, treating blanks and garbage as
/// absent so that malformed dates never match rather than failing a build.
fn parse_feed_date(value: Option<&JsonValue>) -> Option<NaiveDate> {
    let raw = value?.as_str()?.trim();
    let day = raw.get(0..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn child_ids(meta: &JsonValue, key: &str) -> Vec<DocumentId> {
    meta.get(key)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    JsonValue::String(id) => Some(id.as_str()),
                    other => other.get("id").and_then(JsonValue::as_str),
                })
                .filter(|id| !id.is_empty())
                .map(DocumentId::from)
                .collect()
        })
        .unwrap_or_default()
}

fn meta_str<'a>(meta: &'a JsonValue, key: &str) -> Option<&'a str> {
    meta.get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Map one `documents` row onto the typed model.
pub fn document_from_parts(
    id: &str,
    doctype: &str,
    meta: JsonValue,
    last_modified: Timestamp,
) -> Result<Document, PgStoreError> {
    let kind = DocumentKind::from_db_str(doctype).map_err(|e| PgStoreError::Decode(e.to_string()))?;
    let validity = ValidityRange::new(
        parse_feed_date(meta.get("date_debut")),
        parse_feed_date(meta.get("date_fin")),
    );
    // Rows without an explicit state are in force unless their range is closed.
    let state = match meta_str(&meta, "etat") {
        Some(token) => DocumentState::from_db_str(token)
            .map_err(|e| PgStoreError::Decode(format!("{}: {}", id, e)))?,
        None if validity.is_open_ended() => DocumentState::InForce,
        None => DocumentState::Superseded,
    };
    let logical_number = meta_str(&meta, "num").map(str::to_string);
    let title = meta_str(&meta, "titre")
        .map(str::to_string)
        .or_else(|| logical_number.as_ref().map(|n| format!("Article {}", n)))
        .unwrap_or_default();

    Ok(Document {
        id: DocumentId::new(id),
        kind,
        parent_id: meta_str(&meta, "parent").map(DocumentId::from),
        children_section_ids: child_ids(&meta, "sous_sections"),
        children_article_ids: child_ids(&meta, "articles"),
        validity,
        state,
        logical_number,
        title,
        last_modified,
        metadata: Some(meta),
    })
}

fn document_from_row(row: &Row) -> Result<Document, PgStoreError> {
    let id: String = row.try_get("id")?;
    let doctype: String = row.try_get("doctype")?;
    let meta: Option<JsonValue> = row.try_get("meta")?;
    let last_modified: Timestamp = row.try_get("last_modified")?;
    document_from_parts(&id, &doctype, meta.unwrap_or(JsonValue::Null), last_modified)
}

/// Decode rows, skipping (and logging) the ones that do not fit the model.
fn documents_from_rows(rows: &[Row]) -> Vec<Document> {
    rows.iter()
        .filter_map(|row| match document_from_row(row) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable document row");
                None
            }
        })
        .collect()
}

// ============================================================================
// STORE
// ============================================================================

const DOCUMENT_COLUMNS: &str = "id, doctype, meta, \
     COALESCE(updated_at::timestamptz, to_timestamp(0)) AS last_modified";

/// Document store backed by a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Pool,
}

impl PgDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &PgConfig) -> LexResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, PgStoreError> {
        Ok(self.pool.get().await?)
    }

    async fn query_documents(&self, ids: &[String]) -> Result<Vec<Row>, PgStoreError> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM documents WHERE id = ANY($1) AND doctype IN ('texte', 'texte_version', 'section', 'article')",
            DOCUMENT_COLUMNS
        );
        Ok(conn.query(sql.as_str(), &[&ids]).await?)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_document(&self, id: &DocumentId) -> LexResult<Option<Document>> {
        let rows = self.query_documents(&[id.to_string()]).await?;
        Ok(documents_from_rows(&rows)
            .into_iter()
            .max_by_key(|d| d.last_modified))
    }

    async fn get_documents_by_ids(&self, ids: &[DocumentId]) -> LexResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(DocumentId::to_string).collect();
        let rows = self.query_documents(&ids).await?;
        Ok(documents_from_rows(&rows))
    }

    async fn get_children_candidates(
        &self,
        logical_number: &str,
        parent_id: &DocumentId,
    ) -> LexResult<Vec<Document>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM documents WHERE meta->>'parent' = $1 AND meta->>'num' = $2",
            DOCUMENT_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&parent_id.as_str(), &logical_number])
            .await
            .map_err(PgStoreError::from)?;
        Ok(documents_from_rows(&rows))
    }

    async fn list_root_summaries(&self, scope: &RootScope) -> LexResult<Vec<RootSummary>> {
        let conn = self.get_conn().await?;
        let state = scope.state.map(|s| s.as_db_str().to_string());
        let limit = scope.limit.map(|l| l as i64);
        let rows = conn
            .query(
                "SELECT code_id, titre, nature, etat, \
                        nb_sections::bigint AS nb_sections, nb_articles::bigint AS nb_articles \
                 FROM code_stats \
                 WHERE ($1::bool = false OR nature ILIKE '%CODE%' OR titre ILIKE '%code%') \
                   AND ($2::text IS NULL OR etat = $2) \
                 ORDER BY nb_sections DESC, nb_articles DESC \
                 LIMIT $3",
                &[&scope.codes_only, &state, &limit],
            )
            .await
            .map_err(PgStoreError::from)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let etat: Option<String> = row.try_get("etat").map_err(PgStoreError::from)?;
            let section_count: Option<i64> =
                row.try_get("nb_sections").map_err(PgStoreError::from)?;
            let article_count: Option<i64> =
                row.try_get("nb_articles").map_err(PgStoreError::from)?;
            summaries.push(RootSummary {
                root_id: DocumentId::new(row.try_get::<_, String>("code_id").map_err(PgStoreError::from)?),
                title: row
                    .try_get::<_, Option<String>>("titre")
                    .map_err(PgStoreError::from)?
                    .unwrap_or_default(),
                nature: row.try_get("nature").map_err(PgStoreError::from)?,
                state: etat
                    .as_deref()
                    .and_then(|e| DocumentState::from_db_str(e).ok())
                    .unwrap_or(DocumentState::InForce),
                section_count: section_count.unwrap_or(0).max(0) as u64,
                article_count: article_count.unwrap_or(0).max(0) as u64,
            });
        }
        Ok(scope.apply(summaries))
    }
}
