//! Plugin registry and name resolution.
//!
//! The registry maps plugin names to factories. Built-in plugins are
//! registered by [`PluginRegistry::with_builtins`]; embedders can add their
//! own with [`PluginRegistry::register`]. Names are resolved into handles once,
//! before any input is touched, and the resulting chain never changes during a
//! batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::external::DEFAULT_TIMEOUT;
use super::{builtin, PluginHandle, PluginOptions, PluginSpec};
use crate::error::{PluginError, ResolveError};

/// Plugins applied when the caller does not ask for any, in this order.
pub const DEFAULT_PLUGINS: &[&str] = &["gifsicle", "jpegtran", "optipng", "svgo"];

/// Everything a factory gets to build one plugin instance.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// Name the plugin was requested under.
    pub name: &'a str,
    /// Options supplied with the request.
    pub options: &'a PluginOptions,
    /// Time budget for each external invocation.
    pub timeout: Duration,
}

/// Builds a plugin from its options.
pub type PluginFactory =
    Arc<dyn Fn(BuildContext<'_>) -> Result<PluginHandle, PluginError> + Send + Sync>;

/// Registry of plugin factories keyed by name.
#[derive(Clone)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
    timeout: Duration,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Creates a registry with every built-in plugin registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Sets the per-invocation timeout handed to factories.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(BuildContext<'_>) -> Result<PluginHandle, PluginError> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering plugin factory: {}", name);
        self.factories.insert(name, Arc::new(factory));
    }

    /// Whether a factory exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds a single plugin.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPlugin` if nothing is registered under the name, or
    /// `Construction` if the factory rejects the options or its program is
    /// not installed.
    pub fn build(&self, spec: &PluginSpec) -> Result<PluginHandle, ResolveError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| ResolveError::UnknownPlugin(spec.name.clone()))?;

        let context = BuildContext {
            name: &spec.name,
            options: &spec.options,
            timeout: self.timeout,
        };
        factory(context).map_err(|source| ResolveError::Construction {
            name: spec.name.clone(),
            source,
        })
    }

    /// Resolves an ordered list of specs into an ordered plugin chain.
    ///
    /// An empty list resolves [`DEFAULT_PLUGINS`]. Resolution stops at the
    /// first name that cannot be built.
    pub fn resolve(&self, specs: &[PluginSpec]) -> Result<Vec<PluginHandle>, ResolveError> {
        let defaults;
        let specs = if specs.is_empty() {
            defaults = default_specs();
            &defaults[..]
        } else {
            specs
        };

        let chain = specs
            .iter()
            .map(|spec| self.build(spec))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Resolved plugin chain: {}",
            chain
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(chain)
    }

    /// A user-facing remediation hint for a resolution failure.
    pub fn hint(&self, error: &ResolveError) -> String {
        match error {
            ResolveError::UnknownPlugin(_) => format!(
                "Did you forget to register the plugin?\nAvailable plugins: {}",
                self.names().join(", ")
            ),
            ResolveError::Construction {
                source: PluginError::NotInstalled { program, .. },
                ..
            } => format!(
                "Did you forget to install the plugin?\nInstall `{}` and make sure it is on your PATH.",
                program
            ),
            ResolveError::Construction { .. } | ResolveError::InvalidSpec(_) => {
                "Plugins are given as NAME or NAME:KEY=VALUE,KEY=VALUE.".to_string()
            }
            ResolveError::EmptyChain => "Specify at least one plugin with --plugin.".to_string(),
        }
    }
}

/// The default plugin list as specs.
pub fn default_specs() -> Vec<PluginSpec> {
    DEFAULT_PLUGINS.iter().map(|name| PluginSpec::new(*name)).collect()
}
