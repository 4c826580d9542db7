//! Subscriber setup for binaries embedding the engine.
//!
//! Library code logs through `log` macros and `tracing` spans. Nothing is
//! emitted until a binary calls [`init_logging`] once at startup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter, Layer, Registry};

use crate::error::ConfigError;

/// Environment variable holding a full filter directive, e.g.
/// `smartbatch=debug,warn`. Overrides `LoggingConfig::level`.
pub const LOG_ENV_VAR: &str = "SMARTBATCH_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Logging {
                message: format!("Invalid log format: {} (must be 'json' or 'text')", other),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Colored output; text format only.
    #[serde(default = "default_true")]
    pub ansi: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            ansi: default_true(),
        }
    }
}

/// Builds the filter: `SMARTBATCH_LOG` if set and valid, otherwise the
/// configured level.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Logging {
        message: format!("Invalid log level '{}': {}", config.level, e),
    })
}

/// Installs the global subscriber (writing to stderr) and forwards `log`
/// records into it. Fails if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_env_filter(config)?;

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt_layer::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Text => fmt_layer::layer()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(config.ansi)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let subscriber = Registry::default().with(output).with(filter);
    tracing::subscriber::set_global_default(subscriber).map_err(|e| ConfigError::Logging {
        message: format!("Failed to install subscriber: {}", e),
    })?;
    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging {
        message: format!("Failed to bridge log records: {}", e),
    })?;

    Ok(())
}
