//! Transformation plugins.
//!
//! A plugin is a named, swappable `bytes -> bytes` transformation. Plugins are
//! looked up by name in a [`PluginRegistry`] once at startup and then applied,
//! in the order they were requested, to every work item of a batch.
//!
//! # Example
//!
//! ```rust,ignore
//! use imgmin::plugin::{PluginRegistry, PluginSpec};
//!
//! let registry = PluginRegistry::with_builtins();
//! let specs = vec!["jpegtran:progressive=true".parse::<PluginSpec>()?];
//! let chain = registry.resolve(&specs)?;
//!
//! let mut data = std::fs::read("photo.jpg")?;
//! for plugin in &chain {
//!     if plugin.accepts(&data) {
//!         data = plugin.transform(data).await?;
//!     }
//! }
//! ```

pub mod builtin;
pub mod external;
pub mod format;
pub mod registry;

pub use format::ImageFormat;
pub use registry::{BuildContext, PluginFactory, PluginRegistry, DEFAULT_PLUGINS};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, ResolveError};

/// A single transformation capability.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registered plugin name.
    fn name(&self) -> &str;

    /// Whether this plugin understands the given input. Inputs that are not
    /// accepted pass through the plugin unchanged.
    fn accepts(&self, _input: &[u8]) -> bool {
        true
    }

    /// Transform the input bytes.
    async fn transform(&self, input: Vec<u8>) -> Result<Vec<u8>, PluginError>;
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name()).finish()
    }
}

/// A resolved, callable plugin.
pub type PluginHandle = Arc<dyn Plugin>;

/// Construction options for a plugin (`key=value` pairs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOptions(BTreeMap<String, String>);

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option, replacing any previous value for the key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Rejects any key not in `allowed`.
    pub fn ensure_known(&self, plugin: &str, allowed: &[&str]) -> Result<(), PluginError> {
        match self.0.keys().find(|key| !allowed.contains(&key.as_str())) {
            Some(key) => Err(PluginError::UnknownOption {
                plugin: plugin.to_string(),
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Reads a boolean option, falling back to `default` when absent.
    pub fn bool_or(&self, plugin: &str, key: &str, default: bool) -> Result<bool, PluginError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(PluginError::InvalidOption {
                plugin: plugin.to_string(),
                key: key.to_string(),
                message: format!("expected boolean value, got '{}'", value),
            }),
        }
    }

    /// Reads an integer option bounded to `range`, falling back to `default`.
    pub fn level_or(
        &self,
        plugin: &str,
        key: &str,
        range: std::ops::RangeInclusive<u8>,
        default: u8,
    ) -> Result<u8, PluginError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        let invalid = || PluginError::InvalidOption {
            plugin: plugin.to_string(),
            key: key.to_string(),
            message: format!(
                "expected an integer between {} and {}, got '{}'",
                range.start(),
                range.end(),
                value
            ),
        };
        let level: u8 = value.parse().map_err(|_| invalid())?;
        if range.contains(&level) {
            Ok(level)
        } else {
            Err(invalid())
        }
    }
}

/// A requested plugin: its name plus construction options.
///
/// Parsed from `name` or `name:key=value,key=value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub options: PluginOptions,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: PluginOptions::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.with(key, value);
        self
    }
}

impl FromStr for PluginSpec {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ResolveError::InvalidSpec(s.to_string());
        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => (name.trim(), Some(rest)),
            None => (s.trim(), None),
        };
        if name.is_empty() {
            return Err(invalid());
        }

        let mut spec = PluginSpec::new(name);
        if let Some(rest) = rest {
            for pair in rest.split(',').filter(|p| !p.trim().is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(invalid)?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(invalid());
                }
                spec = spec.with_option(key, value.trim());
            }
        }
        Ok(spec)
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.options.is_empty() {
            let pairs: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, ":{}", pairs.join(","))?;
        }
        Ok(())
    }
}
