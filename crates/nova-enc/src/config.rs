//! Configuration of the edit-and-continue service and its logging.

use std::path::Path;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::error::EncError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub faults: FaultsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or an `EnvFilter` directive
    /// string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level merged with `RUST_LOG`.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(&directives)
            .map(drop)
            .map_err(|_| ConfigError::InvalidLogLevel(self.level.clone()))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Cap on documents analyzed at once; `0` means unbounded.
    #[serde(default)]
    pub max_concurrent_analyses: usize,

    /// Re-check the per-document ordering of the active statement index
    /// whenever it is rebuilt.
    #[serde(default = "AnalysisConfig::default_validate_statement_order")]
    pub validate_statement_order: bool,
}

impl AnalysisConfig {
    fn default_validate_statement_order() -> bool {
        true
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_concurrent_analyses: 0,
            validate_statement_order: Self::default_validate_statement_order(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultsConfig {
    #[serde(default = "FaultsConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl FaultsConfig {
    fn default_channel_capacity() -> usize {
        64
    }
}

impl Default for FaultsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid logging level {0:?}")]
    InvalidLogLevel(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_owned())
    }
}

impl From<ConfigError> for EncError {
    fn from(err: ConfigError) -> Self {
        EncError::Config(err.to_string())
    }
}

impl EncConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EncConfig = toml::from_str(text)?;
        config.logging.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber. Only the first call has an
/// effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();
        let layer: Box<dyn Layer<_> + Send + Sync> = match (config.stderr, config.json) {
            (false, _) => Box::new(tracing_subscriber::layer::Identity::new()),
            (true, true) => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(stderr_writer())
                .with_ansi(false)
                .boxed(),
            (true, false) => tracing_subscriber::fmt::layer()
                .with_writer(stderr_writer())
                .with_ansi(false)
                .boxed(),
        };
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

fn stderr_writer() -> tracing_subscriber::fmt::writer::BoxMakeWriter {
    // Debug builds route through `TestWriter` so `cargo test` captures logs.
    if cfg!(debug_assertions) {
        tracing_subscriber::fmt::writer::BoxMakeWriter::new(
            tracing_subscriber::fmt::writer::TestWriter::with_stderr,
        )
    } else {
        tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr)
    }
}
