//! imgmin: batch image minification through swappable optimiser plugins.
//!
//! This library resolves a chain of plugins by name, expands input paths and
//! globs into work items, transforms them concurrently, and writes the
//! results to stdout, an output directory, or back in place.

pub mod cli;
pub mod error;
pub mod pipeline;
pub mod plugin;

// Re-export commonly used error types
pub use error::{BatchError, DeliveryError, InputError, PluginError, ResolveError};
