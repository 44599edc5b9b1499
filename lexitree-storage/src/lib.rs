//! lexitree Storage - Store Adapters and Tree Cache
//!
//! Read access to the flat document table ([`DocumentStore`]) and persistence
//! of materialized trees and invalidation marks ([`TreeCacheStore`],
//! [`InvalidationLog`]). Orchestration lives in `lexitree-engine`.

pub mod cache;
pub mod document_store;
pub mod pg;

pub use cache::{
    CacheEntryInfo, CacheRead, CacheStats, InMemoryInvalidationLog, InMemoryTreeCache,
    InvalidationLog, LmdbCacheError, LmdbTreeCache, PutOutcome, TreeCacheStore,
};
pub use document_store::{DocumentStore, InMemoryDocumentStore};
pub use pg::{PgConfig, PgDocumentStore, PgStoreError};
