//! Transform runner.
//!
//! Applies the resolved plugin chain to one work item. A failing plugin ends
//! the chain for that item only; the failure is returned as a value so that
//! sibling items keep running.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::input::{ItemSource, WorkItem};
use crate::error::PluginError;
use crate::plugin::PluginHandle;

/// Errors that can occur while transforming a single item.
#[derive(Debug, Error)]
pub enum RunError {
    /// The source file could not be read.
    #[error("Failed to read input: {0}")]
    Read(#[from] std::io::Error),

    /// A plugin in the chain failed.
    #[error("Plugin '{plugin}' failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },
}

/// A successfully transformed item.
#[derive(Debug, Clone)]
pub struct TransformedItem {
    pub source: ItemSource,
    pub data: Vec<u8>,
    /// Size of the input before any plugin ran.
    pub original_size: usize,
    /// Where the bytes go; `None` means stdout.
    pub destination: Option<PathBuf>,
}

/// A per-item failure, recorded against the item and never fatal to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub source: ItemSource,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(source: ItemSource, reason: impl Into<String>) -> Self {
        Self {
            source,
            reason: reason.into(),
        }
    }
}

/// Outcome of running the chain over one item.
pub type TransformResult = Result<TransformedItem, ItemFailure>;

/// Runs an ordered plugin chain over work items.
#[derive(Clone)]
pub struct TransformRunner {
    plugins: Vec<PluginHandle>,
}

impl TransformRunner {
    /// Creates a runner for the given chain.
    pub fn new(plugins: Vec<PluginHandle>) -> Self {
        Self { plugins }
    }

    /// Names of the plugins in application order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Transforms one item.
    ///
    /// Path items are read from disk first. The result carries the item's
    /// destination path when it has a destination directory.
    pub async fn run(&self, item: WorkItem) -> TransformResult {
        let source = item.source();
        let (data, destination) = match item {
            WorkItem::Buffer(buffer) => (buffer.data, None),
            WorkItem::Path(path_item) => {
                let destination = path_item.destination();
                match tokio::fs::read(&path_item.source).await {
                    Ok(data) => (data, destination),
                    Err(e) => {
                        return Err(ItemFailure::new(source, RunError::from(e).to_string()))
                    }
                }
            }
        };

        let original_size = data.len();
        match self.apply(data).await {
            Ok(data) => Ok(TransformedItem {
                source,
                data,
                original_size,
                destination,
            }),
            Err(e) => Err(ItemFailure::new(source, e.to_string())),
        }
    }

    /// Applies the chain to raw bytes. Plugins that do not accept the
    /// current bytes are skipped.
    pub async fn apply(&self, mut data: Vec<u8>) -> Result<Vec<u8>, RunError> {
        for plugin in &self.plugins {
            if !plugin.accepts(&data) {
                debug!("Plugin '{}' skipped: input not accepted", plugin.name());
                continue;
            }

            let started = Instant::now();
            let before = data.len();
            data = plugin
                .transform(data)
                .await
                .map_err(|source| RunError::Plugin {
                    plugin: plugin.name().to_string(),
                    source,
                })?;
            debug!(
                "Plugin '{}' {} -> {} bytes in {:?}",
                plugin.name(),
                before,
                data.len(),
                started.elapsed()
            );
        }
        Ok(data)
    }
}
