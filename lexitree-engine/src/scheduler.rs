//! Cache Maintenance Scheduler
//!
//! Periodic sweep that rebuilds stale cached trees.
//!
//! Each sweep:
//!
//! 1. Logs a summary of invalidation marks recorded over the last 24 hours.
//! 2. Selects cache entries that are stale (marked, outdated format or older
//!    than `stale_after`), or every entry when `force` is set, oldest first
//!    and capped at `limit`.
//! 3. Rebuilds selected roots in parallel, at most `concurrency` at a time.
//!    A root is rebuilt by a single task, so builds of one root never overlap
//!    within a sweep.
//! 4. Retries a build that hit an unavailable store with exponential backoff,
//!    and abandons one that exceeds `build_timeout`.
//!
//! A failing root is reported and skipped; the rest of the sweep continues.
//! A failed rebuild leaves the existing entry untouched.
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let maintainer = Arc::new(CacheMaintainer::new(builder, cache, log, &engine, config));
//! let handle = tokio::spawn(maintenance_task(maintainer, shutdown_rx));
//!
//! let _ = shutdown_tx.send(true);
//! let snapshot = handle.await?;
//! ```

use crate::builder::{BuildOptions, TreeBuilder};
use crate::constants::{
    DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_SWEEP_CONCURRENCY, DEFAULT_SWEEP_INTERVAL_SECS,
    INVALIDATION_SUMMARY_WINDOW_SECS,
};
use chrono::{Duration as ChronoDuration, Utc};
use lexitree_core::{
    BuildError, DocumentId, EngineConfig, LexError, LexResult, RetryConfig, Timestamp,
};
use lexitree_storage::{InvalidationLog, PutOutcome, TreeCacheStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceConfig {
    /// Time between sweeps (default: 1 hour)
    pub sweep_interval: Duration,

    /// Roots rebuilt in parallel (default: 4)
    pub concurrency: usize,

    /// A single root's build is abandoned after this long (default: 5 minutes)
    pub build_timeout: Duration,

    /// Backoff policy for builds that hit an unavailable store
    pub retry: RetryConfig,

    /// Cap on roots rebuilt per sweep
    pub limit: Option<usize>,

    /// Rebuild every cached root regardless of staleness
    pub force: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
            build_timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
            retry: RetryConfig::default(),
            limit: None,
            force: false,
        }
    }
}

impl MaintenanceConfig {
    /// Create MaintenanceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEXITREE_SWEEP_INTERVAL_SECS`: Time between sweeps (default: 3600)
    /// - `LEXITREE_SWEEP_CONCURRENCY`: Roots rebuilt in parallel (default: 4)
    /// - `LEXITREE_BUILD_TIMEOUT_SECS`: Per-root build timeout (default: 300)
    /// - `LEXITREE_SWEEP_LIMIT`: Max roots per sweep (default: unlimited)
    /// - `LEXITREE_SWEEP_FORCE`: Rebuild every entry (default: false)
    /// - `LEXITREE_RETRY_MAX`, `LEXITREE_RETRY_INITIAL_MS`, `LEXITREE_RETRY_MAX_MS`,
    ///   `LEXITREE_RETRY_MULTIPLIER`: Backoff policy (default: 3, 500, 30000, 2.0)
    pub fn from_env() -> Self {
        let sweep_interval = Duration::from_secs(
            std::env::var("LEXITREE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        let concurrency = std::env::var("LEXITREE_SWEEP_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_CONCURRENCY);

        let build_timeout = Duration::from_secs(
            std::env::var("LEXITREE_BUILD_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS),
        );

        let limit = std::env::var("LEXITREE_SWEEP_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok());

        let force = std::env::var("LEXITREE_SWEEP_FORCE")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            sweep_interval,
            concurrency,
            build_timeout,
            retry: EngineConfig::from_env().retry,
            limit,
            force,
        }
    }

    /// Short intervals and timeouts for local runs and tests.
    pub fn development() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            concurrency: 2,
            build_timeout: Duration::from_secs(30),
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(100),
                backoff_multiplier: 2.0,
            },
            limit: None,
            force: false,
        }
    }

    pub fn production() -> Self {
        Self {
            concurrency: 8,
            ..Self::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_build_timeout(mut self, build_timeout: Duration) -> Self {
        self.build_timeout = build_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for maintenance activity since startup.
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    pub sweeps: AtomicU64,
    pub roots_rebuilt: AtomicU64,
    /// Rebuilds whose node content matched the previous entry.
    pub roots_unchanged: AtomicU64,
    pub roots_failed: AtomicU64,
    pub roots_timed_out: AtomicU64,
    pub retries: AtomicU64,
    /// Sweeps that could not list the cache at all.
    pub sweep_errors: AtomicU64,
}

impl MaintenanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            roots_rebuilt: self.roots_rebuilt.load(Ordering::Relaxed),
            roots_unchanged: self.roots_unchanged.load(Ordering::Relaxed),
            roots_failed: self.roots_failed.load(Ordering::Relaxed),
            roots_timed_out: self.roots_timed_out.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSnapshot {
    pub sweeps: u64,
    pub roots_rebuilt: u64,
    pub roots_unchanged: u64,
    pub roots_failed: u64,
    pub roots_timed_out: u64,
    pub retries: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// SWEEP REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootStatus {
    Rebuilt {
        size_bytes: u64,
        /// Node content identical to the entry it replaced.
        unchanged: bool,
        write: PutOutcome,
    },
    Failed {
        error: LexError,
    },
    TimedOut,
}

/// What happened to one root during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootOutcome {
    pub root_id: DocumentId,
    pub duration: Duration,
    /// Build attempts, including retries.
    pub attempts: u32,
    pub status: RootStatus,
}

impl RootOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RootStatus::Rebuilt { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub started_at: Timestamp,
    pub duration: Duration,
    /// Entries in the cache when the sweep started.
    pub entries_seen: usize,
    /// New invalidation marks since the previous sweep.
    pub new_marks: usize,
    pub outcomes: Vec<RootOutcome>,
}

impl SweepReport {
    pub fn rebuilt(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.rebuilt()
    }

    pub fn outcome(&self, root_id: &DocumentId) -> Option<&RootOutcome> {
        self.outcomes.iter().find(|o| &o.root_id == root_id)
    }
}

// ============================================================================
// MAINTAINER
// ============================================================================

pub struct CacheMaintainer {
    builder: TreeBuilder,
    cache: Arc<dyn TreeCacheStore>,
    log: Arc<dyn InvalidationLog>,
    config: MaintenanceConfig,
    stale_after: Duration,
    build_options: BuildOptions,
    metrics: Arc<MaintenanceMetrics>,
    /// Highest log sequence seen by a completed sweep.
    watermark: AtomicU64,
}

impl CacheMaintainer {
    pub fn new(
        builder: TreeBuilder,
        cache: Arc<dyn TreeCacheStore>,
        log: Arc<dyn InvalidationLog>,
        engine: &EngineConfig,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            builder,
            cache,
            log,
            config,
            stale_after: engine.stale_after,
            build_options: BuildOptions::full().with_max_depth(engine.max_depth),
            metrics: Arc::new(MaintenanceMetrics::new()),
            watermark: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<MaintenanceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run one sweep.
    pub async fn sweep(&self) -> LexResult<SweepReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        self.metrics.sweeps.fetch_add(1, Ordering::Relaxed);

        let new_marks = self.log_invalidation_summary(started_at).await?;

        let entries = self.cache.list_entries().await?;
        let entries_seen = entries.len();
        let mut selected: Vec<_> = entries
            .into_iter()
            .filter(|e| self.config.force || e.is_stale_at(self.stale_after, started_at))
            .collect();
        selected.sort_by(|a, b| {
            a.generated_at
                .cmp(&b.generated_at)
                .then_with(|| a.root_id.cmp(&b.root_id))
        });
        if let Some(limit) = self.config.limit {
            selected.truncate(limit);
        }

        tracing::info!(
            entries = entries_seen,
            selected = selected.len(),
            force = self.config.force,
            concurrency = self.config.concurrency,
            "Cache sweep started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for entry in selected {
            let job = RebuildJob {
                builder: self.builder.clone(),
                cache: Arc::clone(&self.cache),
                options: self.build_options.clone(),
                timeout: self.config.build_timeout,
                retry: self.config.retry.clone(),
                metrics: Arc::clone(&self.metrics),
            };
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                job.run(entry.root_id).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.metrics.roots_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "Rebuild task aborted");
                }
            }
        }
        outcomes.sort_by(|a, b| a.root_id.cmp(&b.root_id));

        let report = SweepReport {
            started_at,
            duration: started.elapsed(),
            entries_seen,
            new_marks,
            outcomes,
        };
        tracing::info!(
            rebuilt = report.rebuilt(),
            failed = report.failed(),
            duration_ms = report.duration.as_millis() as u64,
            "Cache sweep completed"
        );
        Ok(report)
    }

    /// Rebuild one root now, bypassing staleness checks.
    pub async fn rebuild(&self, root_id: &DocumentId) -> RootOutcome {
        RebuildJob {
            builder: self.builder.clone(),
            cache: Arc::clone(&self.cache),
            options: self.build_options.clone(),
            timeout: self.config.build_timeout,
            retry: self.config.retry.clone(),
            metrics: Arc::clone(&self.metrics),
        }
        .run(root_id.clone())
        .await
    }

    /// Log mark counts by reason and advance the log watermark. Returns the
    /// number of marks appended since the previous sweep.
    async fn log_invalidation_summary(&self, now: Timestamp) -> LexResult<usize> {
        let since = now - ChronoDuration::seconds(INVALIDATION_SUMMARY_WINDOW_SECS);
        let counts = self.log.counts_by_reason(since).await?;
        let summary: Vec<String> = counts
            .iter()
            .map(|(reason, count)| format!("{}={}", reason, count))
            .collect();

        let watermark = self.watermark.load(Ordering::Relaxed);
        let new_marks = self.log.marks_after(watermark).await?;
        if let Some((latest, _)) = new_marks.last() {
            self.watermark.fetch_max(*latest, Ordering::Relaxed);
        }

        tracing::info!(
            window_hours = INVALIDATION_SUMMARY_WINDOW_SECS / 3600,
            marks = ?summary,
            new_marks = new_marks.len(),
            "Invalidation summary"
        );
        Ok(new_marks.len())
    }
}

/// Everything one spawned rebuild needs, owned.
struct RebuildJob {
    builder: TreeBuilder,
    cache: Arc<dyn TreeCacheStore>,
    options: BuildOptions,
    timeout: Duration,
    retry: RetryConfig,
    metrics: Arc<MaintenanceMetrics>,
}

impl RebuildJob {
    async fn run(self, root_id: DocumentId) -> RootOutcome {
        let started = Instant::now();
        let previous_hash = match self.cache.get(&root_id).await {
            Ok(tree) => tree.map(|t| t.content_hash()),
            Err(e) => {
                tracing::debug!(root_id = %root_id, error = %e, "Could not read previous entry");
                None
            }
        };

        let mut attempts = 0u32;
        let status = loop {
            attempts += 1;
            let result = match self
                .builder
                .build_with_timeout(&root_id, &self.options, self.timeout)
                .await
            {
                Ok(tree) => self.cache.put(&tree).await.map(|write| (tree, write)),
                Err(e) => Err(e),
            };

            match result {
                Ok((tree, write)) => {
                    break RootStatus::Rebuilt {
                        size_bytes: tree.size_bytes,
                        unchanged: previous_hash.as_deref() == Some(tree.content_hash().as_str()),
                        write,
                    };
                }
                Err(e) if e.is_upstream_unavailable() && attempts <= self.retry.max_retries => {
                    let delay = self.retry.backoff_for(attempts);
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        root_id = %root_id,
                        attempt = attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store unavailable during rebuild, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(LexError::Build(BuildError::Timeout { .. })) => break RootStatus::TimedOut,
                Err(error) => break RootStatus::Failed { error },
            }
        };

        let duration = started.elapsed();
        match &status {
            RootStatus::Rebuilt {
                size_bytes,
                unchanged,
                write,
            } => {
                self.metrics.roots_rebuilt.fetch_add(1, Ordering::Relaxed);
                if *unchanged {
                    self.metrics.roots_unchanged.fetch_add(1, Ordering::Relaxed);
                }
                tracing::info!(
                    root_id = %root_id,
                    duration_ms = duration.as_millis() as u64,
                    attempts,
                    size_bytes,
                    unchanged,
                    write = ?write,
                    "Rebuilt cached tree"
                );
            }
            RootStatus::Failed { error } => {
                self.metrics.roots_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    root_id = %root_id,
                    duration_ms = duration.as_millis() as u64,
                    attempts,
                    error = %error,
                    "Failed to rebuild cached tree"
                );
            }
            RootStatus::TimedOut => {
                self.metrics.roots_timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    root_id = %root_id,
                    timeout_secs = self.timeout.as_secs(),
                    attempts,
                    "Rebuild timed out, existing entry kept"
                );
            }
        }

        RootOutcome {
            root_id,
            duration,
            attempts,
            status,
        }
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run sweeps every `sweep_interval` until the shutdown signal is received.
pub async fn maintenance_task(
    maintainer: Arc<CacheMaintainer>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> MaintenanceSnapshot {
    let mut sweep_interval = interval(maintainer.config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = maintainer.config.sweep_interval.as_secs(),
        concurrency = maintainer.config.concurrency,
        build_timeout_secs = maintainer.config.build_timeout.as_secs(),
        "Cache maintenance task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache maintenance task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                if let Err(e) = maintainer.sweep().await {
                    maintainer.metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "Cache sweep failed");
                }
            }
        }
    }

    let snapshot = maintainer.metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        roots_rebuilt = snapshot.roots_rebuilt,
        roots_failed = snapshot.roots_failed,
        roots_timed_out = snapshot.roots_timed_out,
        retries = snapshot.retries,
        "Cache maintenance task completed"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MaintenanceConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.build_timeout, Duration::from_secs(300));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.limit.is_none());
        assert!(!config.force);
    }

    #[test]
    fn test_presets() {
        let dev = MaintenanceConfig::development();
        let prod = MaintenanceConfig::production();
        assert!(dev.sweep_interval < prod.sweep_interval);
        assert!(dev.build_timeout < prod.build_timeout);
        assert!(prod.concurrency >= MaintenanceConfig::default().concurrency);
    }

    #[test]
    fn test_report_counts() {
        let ok = RootOutcome {
            root_id: DocumentId::new("A"),
            duration: Duration::from_millis(5),
            attempts: 1,
            status: RootStatus::Rebuilt {
                size_bytes: 10,
                unchanged: false,
                write: PutOutcome::Replaced,
            },
        };
        let failed = RootOutcome {
            root_id: DocumentId::new("B"),
            duration: Duration::from_millis(5),
            attempts: 4,
            status: RootStatus::TimedOut,
        };
        let report = SweepReport {
            started_at: Utc::now(),
            duration: Duration::from_millis(10),
            entries_seen: 3,
            new_marks: 0,
            outcomes: vec![ok, failed],
        };
        assert_eq!(report.rebuilt(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.outcome(&DocumentId::new("B")).is_some());
    }
}
