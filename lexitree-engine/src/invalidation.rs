//! Invalidation Tracker
//!
//! Maps document mutations to the container whose cached tree they affect,
//! flags that tree stale and records an audit mark.
//!
//! Notices arrive through an unbounded channel so the write path that emits
//! them never waits on invalidation. The tracker consumes the channel in a
//! background task until shutdown is signalled.

use chrono::Duration as ChronoDuration;
use lexitree_core::{
    DocumentId, DocumentKind, EngineConfig, InvalidationMark, InvalidationReason, LexResult,
    MutationNotice, Timestamp, MAX_TREE_DEPTH,
};
use lexitree_storage::{DocumentStore, InvalidationLog, TreeCacheStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Remembered notices above this count trigger pruning of expired entries.
const RECENT_PRUNE_THRESHOLD: usize = 10_000;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for invalidation activity since startup.
#[derive(Debug, Default)]
pub struct InvalidationMetrics {
    pub notices_received: AtomicU64,
    /// Audit marks appended to the log.
    pub marks_recorded: AtomicU64,
    /// Marks that flipped a fresh root to stale.
    pub roots_invalidated: AtomicU64,
    pub duplicates_ignored: AtomicU64,
    /// Notices whose container could not be determined.
    pub orphans_dropped: AtomicU64,
    pub errors: AtomicU64,
}

impl InvalidationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> InvalidationSnapshot {
        InvalidationSnapshot {
            notices_received: self.notices_received.load(Ordering::Relaxed),
            marks_recorded: self.marks_recorded.load(Ordering::Relaxed),
            roots_invalidated: self.roots_invalidated.load(Ordering::Relaxed),
            duplicates_ignored: self.duplicates_ignored.load(Ordering::Relaxed),
            orphans_dropped: self.orphans_dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationSnapshot {
    pub notices_received: u64,
    pub marks_recorded: u64,
    pub roots_invalidated: u64,
    pub duplicates_ignored: u64,
    pub orphans_dropped: u64,
    pub errors: u64,
}

// ============================================================================
// NOTICE CHANNEL
// ============================================================================

/// Producer side handed to whatever applies document writes.
#[derive(Debug, Clone)]
pub struct InvalidationSender {
    tx: mpsc::UnboundedSender<MutationNotice>,
}

impl InvalidationSender {
    /// Queue a notice. Returns `false` once the tracker has stopped.
    pub fn notify(&self, notice: MutationNotice) -> bool {
        match self.tx.send(notice) {
            Ok(()) => true,
            Err(mpsc::error::SendError(notice)) => {
                tracing::warn!(
                    document_id = %notice.document_id,
                    "Invalidation tracker stopped, notice dropped"
                );
                false
            }
        }
    }
}

/// Create a connected sender and receiver for mutation notices.
pub fn notice_channel() -> (InvalidationSender, mpsc::UnboundedReceiver<MutationNotice>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InvalidationSender { tx }, rx)
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct InvalidationTracker {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn TreeCacheStore>,
    log: Arc<dyn InvalidationLog>,
    dedup_window: Duration,
    max_hops: usize,
    recent: Mutex<HashMap<DocumentId, Timestamp>>,
    metrics: InvalidationMetrics,
}

impl InvalidationTracker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn TreeCacheStore>,
        log: Arc<dyn InvalidationLog>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            log,
            dedup_window: config.invalidation_dedup_window,
            max_hops: MAX_TREE_DEPTH + 1,
            recent: Mutex::new(HashMap::new()),
            metrics: InvalidationMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &InvalidationMetrics {
        &self.metrics
    }

    /// Process one notice.
    ///
    /// Returns the recorded mark, or `None` when the notice was a repeat
    /// within the dedup window or its container could not be determined.
    pub async fn handle(&self, notice: &MutationNotice) -> LexResult<Option<InvalidationMark>> {
        self.metrics.notices_received.fetch_add(1, Ordering::Relaxed);

        if self.is_repeat(notice).await {
            self.metrics.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                document_id = %notice.document_id,
                "Repeated mutation notice within dedup window, ignored"
            );
            return Ok(None);
        }

        let Some(root_id) = self.find_root(notice).await? else {
            self.metrics.orphans_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                document_id = %notice.document_id,
                kind = %notice.kind,
                "No container found for mutated document, notice dropped"
            );
            return Ok(None);
        };

        let reason = InvalidationReason::for_kind(notice.kind);
        let newly_stale = self.cache.mark_stale(&root_id, notice.event_time).await?;
        let mark = InvalidationMark::new(
            root_id,
            reason,
            notice.event_time,
            notice.document_id.clone(),
        );
        let sequence = self.log.append(&mark).await?;
        self.remember(notice).await;

        self.metrics.marks_recorded.fetch_add(1, Ordering::Relaxed);
        if newly_stale {
            self.metrics.roots_invalidated.fetch_add(1, Ordering::Relaxed);
        }
        tracing::info!(
            root_id = %mark.root_id,
            source_document_id = %mark.source_document_id,
            reason = %mark.reason,
            sequence,
            newly_stale,
            "Recorded invalidation mark"
        );

        Ok(Some(mark))
    }

    /// Walk parent links up to the owning container.
    async fn find_root(&self, notice: &MutationNotice) -> LexResult<Option<DocumentId>> {
        if notice.kind == DocumentKind::Container {
            return Ok(Some(notice.document_id.clone()));
        }

        let mut next = match &notice.parent_id {
            Some(parent) => Some(parent.clone()),
            None => self
                .store
                .get_document(&notice.document_id)
                .await?
                .and_then(|doc| doc.parent_id),
        };

        for _ in 0..self.max_hops {
            let Some(id) = next else {
                return Ok(None);
            };
            let Some(doc) = self.store.get_document(&id).await? else {
                return Ok(None);
            };
            if doc.kind == DocumentKind::Container {
                return Ok(Some(doc.id));
            }
            next = doc.parent_id;
        }

        Ok(None)
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.dedup_window).unwrap_or(ChronoDuration::zero())
    }

    /// Whether a mark for the same document was applied within the window.
    async fn is_repeat(&self, notice: &MutationNotice) -> bool {
        let window = self.window();
        let recent = self.recent.lock().await;
        recent.get(&notice.document_id).is_some_and(|last| {
            let elapsed = notice.event_time.signed_duration_since(*last);
            elapsed >= ChronoDuration::zero() && elapsed < window
        })
    }

    /// Remember a notice whose mark has been applied. Notices that failed
    /// part way are never remembered, so a redelivery is processed again.
    async fn remember(&self, notice: &MutationNotice) {
        let window = self.window();
        let mut recent = self.recent.lock().await;
        recent.insert(notice.document_id.clone(), notice.event_time);

        if recent.len() > RECENT_PRUNE_THRESHOLD {
            let cutoff = notice.event_time - window;
            recent.retain(|_, seen| *seen >= cutoff);
        }
    }

    /// Consume notices until `shutdown_rx` flips to `true` or every sender
    /// is dropped. Queued notices are drained before returning.
    pub async fn run(
        self: Arc<Self>,
        mut notices: mpsc::UnboundedReceiver<MutationNotice>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> InvalidationSnapshot {
        tracing::info!(
            dedup_window_secs = self.dedup_window.as_secs(),
            "Invalidation tracker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Invalidation tracker shutting down");
                        break;
                    }
                }

                notice = notices.recv() => {
                    match notice {
                        Some(notice) => self.handle_logged(&notice).await,
                        None => break,
                    }
                }
            }
        }

        while let Ok(notice) = notices.try_recv() {
            self.handle_logged(&notice).await;
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            notices_received = snapshot.notices_received,
            marks_recorded = snapshot.marks_recorded,
            roots_invalidated = snapshot.roots_invalidated,
            duplicates_ignored = snapshot.duplicates_ignored,
            orphans_dropped = snapshot.orphans_dropped,
            errors = snapshot.errors,
            "Invalidation tracker stopped"
        );
        snapshot
    }

    async fn handle_logged(&self, notice: &MutationNotice) {
        if let Err(e) = self.handle(notice).await {
            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                document_id = %notice.document_id,
                error = %e,
                "Failed to process mutation notice"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_starts_at_zero() {
        let metrics = InvalidationMetrics::new();
        metrics.duplicates_ignored.fetch_add(2, Ordering::Relaxed);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.duplicates_ignored, 2);
        assert_eq!(snapshot.marks_recorded, 0);
    }

    #[tokio::test]
    async fn test_sender_reports_stopped_tracker() {
        let (sender, rx) = notice_channel();
        drop(rx);
        let notice = MutationNotice {
            document_id: DocumentId::new("A1"),
            kind: DocumentKind::Article,
            parent_id: None,
            event_time: chrono::Utc::now(),
        };
        assert!(!sender.notify(notice));
    }
}
