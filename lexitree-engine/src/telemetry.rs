//! Tracing Subscriber Initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! JSON or a human-readable formatting layer.

use crate::constants::{DEFAULT_LOG_FILTER, DEFAULT_SERVICE_NAME};
use lexitree_core::{ConfigError, LexResult};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::InvalidValue {
                field: "log_format".to_string(),
                value: other.to_string(),
                reason: "expected json or pretty".to_string(),
            }),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_format: LogFormat::default(),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `LEXITREE_SERVICE_NAME` and `LEXITREE_LOG_FORMAT`. An unknown
    /// format is a configuration error.
    pub fn from_env() -> LexResult<Self> {
        let log_format = match std::env::var("LEXITREE_LOG_FORMAT") {
            Ok(raw) => raw.parse::<LogFormat>()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self {
            service_name: std::env::var("LEXITREE_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
            log_format,
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        })
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }
}

/// Install the global subscriber. Call once at startup; a second call fails.
pub fn init_tracing(config: &TelemetryConfig) -> LexResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.map_err(|e| ConfigError::InvalidValue {
        field: "tracing_subscriber".to_string(),
        value: config.log_format.to_string(),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(
        service_name = %config.service_name,
        log_format = %config.log_format,
        "Telemetry initialized"
    );
    Ok(())
}
