//! Engine Constants
//!
//! Defaults for background tasks. Tree-shape limits live in
//! `lexitree_core::config`.

// ============================================================================
// CACHE MAINTENANCE
// ============================================================================

/// Interval between maintenance sweeps (1 hour).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Roots rebuilt concurrently during a sweep.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 4;

/// Per-root build timeout (5 minutes).
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 300;

/// Window over which the sweep summarizes invalidation marks (24 hours).
pub const INVALIDATION_SUMMARY_WINDOW_SECS: i64 = 86_400;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "lexitree_engine=info,lexitree_storage=info,warn";

pub const DEFAULT_SERVICE_NAME: &str = "lexitree";
