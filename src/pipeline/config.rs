//! Dispatch configuration.
//!
//! This module provides the settings for a batch run: the requested plugin
//! chain, the output sink, and execution limits.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::plugin::external::DEFAULT_TIMEOUT;
use crate::plugin::PluginSpec;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Both an output directory and in-place writing were requested.
    #[error("--out-dir and --write cannot be used together")]
    ConflictingSinks,
}

/// Where transformed bytes go. Decided once per run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SinkMode {
    /// Raw bytes on standard output; only valid for a single item.
    #[default]
    Stdout,
    /// Mirror each input below this directory.
    Directory(PathBuf),
    /// Overwrite each input file.
    InPlace,
}

impl SinkMode {
    /// Derives the sink from the `--out-dir` and `--write` flags.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConflictingSinks` if both are given.
    pub fn from_flags(out_dir: Option<PathBuf>, write: bool) -> Result<Self, ConfigError> {
        match (out_dir, write) {
            (Some(_), true) => Err(ConfigError::ConflictingSinks),
            (Some(dir), false) => Ok(SinkMode::Directory(dir)),
            (None, true) => Ok(SinkMode::InPlace),
            (None, false) => Ok(SinkMode::Stdout),
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, SinkMode::Stdout)
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkMode::Stdout => write!(f, "stdout"),
            SinkMode::Directory(dir) => write!(f, "directory {}", dir.display()),
            SinkMode::InPlace => write!(f, "in-place"),
        }
    }
}

/// Configuration for a batch run.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Requested plugins in application order; empty means the defaults.
    pub plugins: Vec<PluginSpec>,
    /// Output sink.
    pub sink: SinkMode,
    /// Maximum number of items transformed at once.
    pub max_concurrency: usize,
    /// Time budget for one external plugin invocation.
    pub plugin_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            sink: SinkMode::Stdout,
            max_concurrency: default_concurrency(),
            plugin_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DispatchConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `IMGMIN_CONCURRENCY`: Maximum in-flight items (default: available parallelism)
    /// - `IMGMIN_PLUGIN_TIMEOUT_SECS`: Timeout per plugin invocation (default: 120)
    /// - `IMGMIN_PLUGINS`: Comma-separated plugin names used instead of the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("IMGMIN_CONCURRENCY") {
            config.max_concurrency = parse_env_value(&val, "IMGMIN_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("IMGMIN_PLUGIN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "IMGMIN_PLUGIN_TIMEOUT_SECS")?;
            config.plugin_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("IMGMIN_PLUGINS") {
            config.plugins = parse_plugin_list(&val, "IMGMIN_PLUGINS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ValidationFailed(format!(
                "max_concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }

        if self.plugin_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "plugin_timeout must be greater than 0".to_string(),
            ));
        }

        if let SinkMode::Directory(dir) = &self.sink {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "output directory cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Builder method to set the plugin chain.
    pub fn with_plugins(mut self, plugins: Vec<PluginSpec>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Builder method to set the sink.
    pub fn with_sink(mut self, sink: SinkMode) -> Self {
        self.sink = sink;
        self
    }

    /// Builder method to set max concurrency.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Builder method to set the plugin timeout.
    pub fn with_plugin_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_timeout = timeout;
        self
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse a comma-separated list of plugin names.
fn parse_plugin_list(value: &str, key: &str) -> Result<Vec<PluginSpec>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("invalid plugin '{}'", name),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert!(config.plugins.is_empty());
        assert_eq!(config.sink, SinkMode::Stdout);
        assert!(config.max_concurrency >= 1);
        assert_eq!(config.plugin_timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = DispatchConfig::new()
            .with_plugins(vec![PluginSpec::new("optipng")])
            .with_sink(SinkMode::InPlace)
            .with_max_concurrency(2)
            .with_plugin_timeout(Duration::from_secs(5));

        assert_eq!(config.plugins, vec![PluginSpec::new("optipng")]);
        assert_eq!(config.sink, SinkMode::InPlace);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.plugin_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_sink_from_flags() {
        assert_eq!(SinkMode::from_flags(None, false).unwrap(), SinkMode::Stdout);
        assert_eq!(SinkMode::from_flags(None, true).unwrap(), SinkMode::InPlace);
        assert_eq!(
            SinkMode::from_flags(Some(PathBuf::from("build")), false).unwrap(),
            SinkMode::Directory(PathBuf::from("build"))
        );
        assert!(matches!(
            SinkMode::from_flags(Some(PathBuf::from("build")), true),
            Err(ConfigError::ConflictingSinks)
        ));
    }

    #[test]
    fn test_validation_invalid_concurrency() {
        let config = DispatchConfig::default().with_max_concurrency(0);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_validation_concurrency_above_permit_limit() {
        let config = DispatchConfig::default().with_max_concurrency(usize::MAX);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at most"));

        let config = DispatchConfig::default().with_max_concurrency(Semaphore::MAX_PERMITS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_timeout() {
        let config = DispatchConfig::default().with_plugin_timeout(Duration::ZERO);
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("plugin_timeout"));
    }

    #[test]
    fn test_validation_empty_out_dir() {
        let config = DispatchConfig::default().with_sink(SinkMode::Directory(PathBuf::new()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_plugin_list() {
        let plugins = parse_plugin_list("optipng, jpegtran:progressive=true,,", "KEY").unwrap();
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0].name, "optipng");
        assert_eq!(plugins[1].options.get("progressive"), Some("true"));

        let err = parse_plugin_list("optipng:level", "KEY").unwrap_err();
        assert!(err.to_string().contains("KEY"));
    }

    #[test]
    fn test_parse_env_value() {
        assert_eq!(parse_env_value::<usize>(" 8 ", "K").unwrap(), 8);
        assert!(parse_env_value::<usize>("eight", "K").is_err());
    }
}
