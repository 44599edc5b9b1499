//! Tree cache layer.
//!
//! One materialized tree per container, replaced wholesale on regeneration,
//! plus the append-only log of invalidation marks that explains why entries
//! went stale.
//!
//! Two backends implement both traits:
//!
//! - [`InMemoryTreeCache`] / [`InMemoryInvalidationLog`] for tests and
//!   single-process deployments
//! - [`LmdbTreeCache`] for a cache that survives restarts
//!
//! # Example
//!
//! ```ignore
//! let cache = LmdbTreeCache::open("/var/lib/lexitree/cache", 4096)?;
//! cache.put(&tree).await?;
//! if cache.is_stale(&tree.root_id, Duration::from_secs(86_400)).await? {
//!     // schedule a rebuild
//! }
//! ```

pub mod freshness;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use freshness::CacheRead;
pub use lmdb_backend::{LmdbCacheError, LmdbTreeCache};
pub use memory::{InMemoryInvalidationLog, InMemoryTreeCache};
pub use traits::{CacheEntryInfo, CacheStats, InvalidationLog, PutOutcome, TreeCacheStore};
