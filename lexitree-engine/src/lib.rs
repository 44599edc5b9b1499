//! lexitree Engine - Tree Building and Cache Orchestration
//!
//! Async orchestration over the store adapters in `lexitree-storage`:
//!
//! - [`TreeBuilder`]: level-by-level construction of materialized trees
//! - [`TreeService`]: the read path (cache first, build on miss)
//! - [`InvalidationTracker`]: mutation notices to stale marks
//! - [`CacheMaintainer`]: periodic rebuild of stale entries
//! - [`telemetry`]: tracing subscriber setup

pub mod builder;
pub mod constants;
pub mod invalidation;
pub mod scheduler;
pub mod service;
pub mod telemetry;

pub use builder::{BuildOptions, BuildStats, TreeBuilder};
pub use invalidation::{
    notice_channel, InvalidationMetrics, InvalidationSender, InvalidationSnapshot,
    InvalidationTracker,
};
pub use scheduler::{
    maintenance_task, CacheMaintainer, MaintenanceConfig, MaintenanceMetrics, MaintenanceSnapshot,
    RootOutcome, RootStatus, SweepReport,
};
pub use service::{TreeRequest, TreeService};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
