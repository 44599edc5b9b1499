//! Configuration types

use crate::{ConfigError, LexResult, TieBreak};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deepest section level any tree can be expanded to.
pub const MAX_TREE_DEPTH: usize = 10;

/// Largest page a tree view can request.
pub const MAX_PER_PAGE: usize = 500;

/// Retry policy for calls to the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff to wait before retry number `attempt` (1-based), capped at
    /// `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let factor = f64::from(self.backoff_multiplier).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn validate(&self) -> LexResult<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "backoff_multiplier".to_string(),
                value: self.backoff_multiplier.to_string(),
                reason: "backoff_multiplier must be at least 1.0".to_string(),
            }
            .into());
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::InvalidValue {
                field: "initial_backoff".to_string(),
                value: format!("{:?}", self.initial_backoff),
                reason: "initial_backoff must not exceed max_backoff".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Settings shared by the tree builder, the cache and the read path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Section levels expanded by a full build.
    pub max_depth: usize,
    /// Cache entries older than this are stale.
    pub stale_after: Duration,
    pub default_per_page: usize,
    /// Article refs stored per node; counts still cover every article.
    pub max_articles_per_node: usize,
    /// Largest id set sent to the document store in one lookup.
    pub batch_size: usize,
    pub tie_break: TieBreak,
    /// Repeat notifications for one document inside this window are ignored.
    pub invalidation_dedup_window: Duration,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_TREE_DEPTH,
            stale_after: Duration::from_secs(24 * 3600),
            default_per_page: 50,
            max_articles_per_node: 500,
            batch_size: 1000,
            tie_break: TieBreak::LatestModified,
            invalidation_dedup_window: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `LEXITREE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_depth: env_parse("LEXITREE_MAX_DEPTH").unwrap_or(defaults.max_depth),
            stale_after: env_parse("LEXITREE_STALE_AFTER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
            default_per_page: env_parse("LEXITREE_DEFAULT_PER_PAGE")
                .unwrap_or(defaults.default_per_page),
            max_articles_per_node: env_parse("LEXITREE_MAX_ARTICLES_PER_NODE")
                .unwrap_or(defaults.max_articles_per_node),
            batch_size: env_parse("LEXITREE_BATCH_SIZE").unwrap_or(defaults.batch_size),
            tie_break: env_parse("LEXITREE_TIE_BREAK").unwrap_or(defaults.tie_break),
            invalidation_dedup_window: env_parse("LEXITREE_INVALIDATION_DEDUP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.invalidation_dedup_window),
            retry: RetryConfig {
                max_retries: env_parse("LEXITREE_RETRY_MAX").unwrap_or(defaults.retry.max_retries),
                initial_backoff: env_parse("LEXITREE_RETRY_INITIAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_backoff),
                max_backoff: env_parse("LEXITREE_RETRY_MAX_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_backoff),
                backoff_multiplier: env_parse("LEXITREE_RETRY_MULTIPLIER")
                    .unwrap_or(defaults.retry.backoff_multiplier),
            },
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_invalidation_dedup_window(mut self, window: Duration) -> Self {
        self.invalidation_dedup_window = window;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_depth in [1, MAX_TREE_DEPTH]
    /// - default_per_page in [1, MAX_PER_PAGE]
    /// - batch_size and max_articles_per_node > 0
    /// - stale_after is positive
    /// - retry policy is coherent
    pub fn validate(&self) -> LexResult<()> {
        if self.max_depth < 1 || self.max_depth > MAX_TREE_DEPTH {
            return Err(invalid(
                "max_depth",
                self.max_depth,
                format!("max_depth must be between 1 and {}", MAX_TREE_DEPTH),
            ));
        }

        if self.default_per_page < 1 || self.default_per_page > MAX_PER_PAGE {
            return Err(invalid(
                "default_per_page",
                self.default_per_page,
                format!("default_per_page must be between 1 and {}", MAX_PER_PAGE),
            ));
        }

        if self.batch_size == 0 {
            return Err(invalid(
                "batch_size",
                self.batch_size,
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_articles_per_node == 0 {
            return Err(invalid(
                "max_articles_per_node",
                self.max_articles_per_node,
                "max_articles_per_node must be greater than 0".to_string(),
            ));
        }

        if self.stale_after.is_zero() {
            return Err(invalid(
                "stale_after",
                "0s",
                "stale_after must be positive".to_string(),
            ));
        }

        self.retry.validate()
    }
}

fn invalid(field: &str, value: impl ToString, reason: String) -> crate::LexError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    }
    .into()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_max_depth_validation_matches_bounds(depth in 0usize..32) {
            let valid = EngineConfig::default().with_max_depth(depth).validate().is_ok();
            prop_assert_eq!(valid, (1..=MAX_TREE_DEPTH).contains(&depth));
        }

        #[test]
        fn prop_backoff_never_exceeds_cap(attempt in 1u32..100, initial_ms in 1u64..1_000) {
            let retry = RetryConfig {
                max_retries: attempt,
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_secs(5),
                backoff_multiplier: 2.0,
            };
            prop_assert!(retry.backoff_for(attempt) <= Duration::from_secs(5));
        }
    }
}
