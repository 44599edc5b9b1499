//! LMDB-backed tree cache and invalidation log.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist materialized trees
//! across restarts in a memory-mapped store.
//!
//! # Layout
//!
//! Four named databases share one environment:
//!
//! - `trees`: root id -> `[generated_at micros: 8 bytes LE][tree json]`
//! - `entries`: root id -> entry metadata json (read by sweeps without
//!   loading whole trees)
//! - `stale`: root id -> `[first mark micros: 8 bytes LE][latest mark micros: 8 bytes LE]`
//! - `marks`: sequence (u64 big endian) -> invalidation mark json
//!
//! # Atomicity
//!
//! A `put` compares, writes the tree and its metadata, and clears the stale
//! mark inside a single write transaction. The mark is cleared only when the
//! incoming tree was generated at or after the latest mutation it records. Readers use read transactions and
//! therefore see either the previous or the new entry in full.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::byteorder::BigEndian;
use heed::types::{Bytes, U64};
use heed::{Database, Env, EnvOpenOptions};
use lexitree_core::{
    DocumentId, InvalidationMark, LexError, LexResult, MaterializedTree, StorageError, Timestamp,
};
use serde::{Deserialize, Serialize};

use super::traits::{CacheEntryInfo, CacheStats, InvalidationLog, PutOutcome, TreeCacheStore};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: &'static str, reason: String },

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbCacheError {
    fn from(e: heed::Error) -> Self {
        LmdbCacheError::Transaction(e.to_string())
    }
}

/// Convert LmdbCacheError to LexError.
impl From<LmdbCacheError> for LexError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Serialization(reason) | LmdbCacheError::Deserialization(reason) => {
                LexError::Storage(StorageError::Serialization { reason })
            }
            other => LexError::Storage(StorageError::CacheFailure {
                reason: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    generated_at: Timestamp,
    size_bytes: u64,
    format_version: String,
}

fn encode_micros(ts: Timestamp) -> [u8; 8] {
    ts.timestamp_micros().to_le_bytes()
}

fn decode_micros(bytes: &[u8]) -> Result<Timestamp, LmdbCacheError> {
    let raw: [u8; 8] = bytes
        .get(0..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| LmdbCacheError::Deserialization("Invalid timestamp".into()))?;
    DateTime::from_timestamp_micros(i64::from_le_bytes(raw))
        .ok_or_else(|| LmdbCacheError::Deserialization("Timestamp out of range".into()))
}

fn encode_mark(first: Timestamp, latest: Timestamp) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&encode_micros(first));
    out[8..].copy_from_slice(&encode_micros(latest));
    out
}

/// Returns `(first, latest)`.
fn decode_mark(bytes: &[u8]) -> Result<(Timestamp, Timestamp), LmdbCacheError> {
    let latest = bytes
        .get(8..16)
        .ok_or_else(|| LmdbCacheError::Deserialization("Truncated stale mark".into()))?;
    Ok((decode_micros(bytes)?, decode_micros(latest)?))
}

/// LMDB-backed tree cache, also serving as the invalidation log.
pub struct LmdbTreeCache {
    env: Env,
    trees: Database<Bytes, Bytes>,
    entries: Database<Bytes, Bytes>,
    stale: Database<Bytes, Bytes>,
    marks: Database<U64<BigEndian>, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbTreeCache {
    /// Open (or create) the cache in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the environment in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(4)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let open_err = |name: &'static str| {
            move |e: heed::Error| LmdbCacheError::DbOpen {
                name,
                reason: e.to_string(),
            }
        };
        let trees = env
            .create_database(&mut wtxn, Some("trees"))
            .map_err(open_err("trees"))?;
        let entries = env
            .create_database(&mut wtxn, Some("entries"))
            .map_err(open_err("entries"))?;
        let stale = env
            .create_database(&mut wtxn, Some("stale"))
            .map_err(open_err("stale"))?;
        let marks = env
            .create_database(&mut wtxn, Some("marks"))
            .map_err(open_err("marks"))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            trees,
            entries,
            stale,
            marks,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn load_tree(&self, root_id: &DocumentId) -> Result<Option<MaterializedTree>, LmdbCacheError> {
        let rtxn = self.env.read_txn()?;
        let Some(bytes) = self.trees.get(&rtxn, root_id.as_str().as_bytes())? else {
            return Ok(None);
        };
        if bytes.len() < 8 {
            return Err(LmdbCacheError::Deserialization("Truncated tree record".into()));
        }
        let tree = serde_json::from_slice(&bytes[8..])
            .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
        Ok(Some(tree))
    }

    fn store_tree(&self, tree: &MaterializedTree) -> Result<PutOutcome, LmdbCacheError> {
        let key = tree.root_id.as_str().as_bytes();
        let tree_json =
            serde_json::to_vec(tree).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let mut record = Vec::with_capacity(8 + tree_json.len());
        record.extend_from_slice(&encode_micros(tree.generated_at));
        record.extend_from_slice(&tree_json);
        let meta = serde_json::to_vec(&EntryMeta {
            generated_at: tree.generated_at,
            size_bytes: tree.size_bytes,
            format_version: tree.format_version.clone(),
        })
        .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;

        let mut wtxn = self.env.write_txn()?;
        let existing = match self.entries.get(&wtxn, key)? {
            Some(bytes) => Some(
                serde_json::from_slice::<EntryMeta>(bytes)
                    .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?,
            ),
            None => None,
        };
        let outcome = match existing {
            Some(meta) if meta.generated_at > tree.generated_at => {
                // Dropping the transaction aborts it.
                return Ok(PutOutcome::Superseded);
            }
            Some(_) => PutOutcome::Replaced,
            None => PutOutcome::Inserted,
        };
        self.trees.put(&mut wtxn, key, &record)?;
        self.entries.put(&mut wtxn, key, &meta)?;
        let mark = match self.stale.get(&wtxn, key)? {
            Some(bytes) => Some(decode_mark(bytes)?),
            None => None,
        };
        if mark.is_some_and(|(_, latest)| latest <= tree.generated_at) {
            self.stale.delete(&mut wtxn, key)?;
        }
        wtxn.commit()?;
        Ok(outcome)
    }

    fn store_stale_mark(
        &self,
        root_id: &DocumentId,
        marked_at: Timestamp,
    ) -> Result<bool, LmdbCacheError> {
        let key = root_id.as_str().as_bytes();
        let mut wtxn = self.env.write_txn()?;
        let existing = match self.stale.get(&wtxn, key)? {
            Some(bytes) => Some(decode_mark(bytes)?),
            None => None,
        };
        let (record, transition) = match existing {
            Some((first, latest)) => {
                (encode_mark(first.min(marked_at), latest.max(marked_at)), false)
            }
            None => (encode_mark(marked_at, marked_at), true),
        };
        self.stale.put(&mut wtxn, key, &record)?;
        wtxn.commit()?;
        Ok(transition)
    }

    fn entry_info(
        &self,
        rtxn: &heed::RoTxn,
        key: &[u8],
        meta_bytes: &[u8],
    ) -> Result<CacheEntryInfo, LmdbCacheError> {
        let meta: EntryMeta = serde_json::from_slice(meta_bytes)
            .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
        let stale_since = match self.stale.get(rtxn, key)? {
            Some(bytes) => Some(decode_mark(bytes)?.0),
            None => None,
        };
        let root_id = String::from_utf8(key.to_vec())
            .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
        Ok(CacheEntryInfo {
            root_id: DocumentId::new(root_id),
            generated_at: meta.generated_at,
            size_bytes: meta.size_bytes,
            format_version: meta.format_version,
            stale_since,
        })
    }

    fn load_entry(&self, root_id: &DocumentId) -> Result<Option<CacheEntryInfo>, LmdbCacheError> {
        let key = root_id.as_str().as_bytes();
        let rtxn = self.env.read_txn()?;
        match self.entries.get(&rtxn, key)? {
            Some(meta) => Ok(Some(self.entry_info(&rtxn, key, meta)?)),
            None => Ok(None),
        }
    }

    fn load_entries(&self) -> Result<Vec<CacheEntryInfo>, LmdbCacheError> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.entries.iter(&rtxn)? {
            let (key, meta) = item?;
            out.push(self.entry_info(&rtxn, key, meta)?);
        }
        Ok(out)
    }

    fn remove_entry(&self, root_id: &DocumentId) -> Result<bool, LmdbCacheError> {
        let key = root_id.as_str().as_bytes();
        let mut wtxn = self.env.write_txn()?;
        let existed = self.trees.delete(&mut wtxn, key)?;
        self.entries.delete(&mut wtxn, key)?;
        self.stale.delete(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(existed)
    }

    fn append_mark(&self, mark: &InvalidationMark) -> Result<u64, LmdbCacheError> {
        let bytes =
            serde_json::to_vec(mark).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let mut wtxn = self.env.write_txn()?;
        let next = match self.marks.last(&wtxn)? {
            Some((seq, _)) => seq + 1,
            None => 1,
        };
        self.marks.put(&mut wtxn, &next, &bytes)?;
        wtxn.commit()?;
        Ok(next)
    }

    fn read_marks_after(&self, sequence: u64) -> Result<Vec<(u64, InvalidationMark)>, LmdbCacheError> {
        let rtxn = self.env.read_txn()?;
        let start = sequence.saturating_add(1);
        let mut out = Vec::new();
        for item in self.marks.range(&rtxn, &(start..))? {
            let (seq, bytes) = item?;
            let mark = serde_json::from_slice(bytes)
                .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
            out.push((seq, mark));
        }
        Ok(out)
    }

    fn last_sequence(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.marks.last(&rtxn)?.map(|(seq, _)| seq).unwrap_or(0))
    }
}

#[async_trait]
impl TreeCacheStore for LmdbTreeCache {
    async fn get(&self, root_id: &DocumentId) -> LexResult<Option<MaterializedTree>> {
        let tree = self.load_tree(root_id)?;
        let counter = if tree.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(tree)
    }

    async fn put(&self, tree: &MaterializedTree) -> LexResult<PutOutcome> {
        let outcome = self.store_tree(tree)?;
        tracing::debug!(
            root_id = %tree.root_id,
            size_bytes = tree.size_bytes,
            outcome = ?outcome,
            "Stored tree in LMDB cache"
        );
        Ok(outcome)
    }

    async fn mark_stale(&self, root_id: &DocumentId, marked_at: Timestamp) -> LexResult<bool> {
        Ok(self.store_stale_mark(root_id, marked_at)?)
    }

    async fn entry(&self, root_id: &DocumentId) -> LexResult<Option<CacheEntryInfo>> {
        Ok(self.load_entry(root_id)?)
    }

    async fn list_entries(&self) -> LexResult<Vec<CacheEntryInfo>> {
        Ok(self.load_entries()?)
    }

    async fn purge(&self, root_id: &DocumentId) -> LexResult<bool> {
        let existed = self.remove_entry(root_id)?;
        if existed {
            tracing::info!(root_id = %root_id, "Purged cached tree");
        }
        Ok(existed)
    }

    async fn stats(&self) -> LexResult<CacheStats> {
        let entries = self.load_entries()?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            marked_stale: entries.iter().filter(|e| e.stale_since.is_some()).count() as u64,
            total_bytes: entries.iter().map(|e| e.size_bytes).sum(),
        })
    }
}

#[async_trait]
impl InvalidationLog for LmdbTreeCache {
    async fn append(&self, mark: &InvalidationMark) -> LexResult<u64> {
        Ok(self.append_mark(mark)?)
    }

    async fn marks_after(&self, sequence: u64) -> LexResult<Vec<(u64, InvalidationMark)>> {
        Ok(self.read_marks_after(sequence)?)
    }

    async fn latest_sequence(&self) -> LexResult<u64> {
        Ok(self.last_sequence()?)
    }
}
