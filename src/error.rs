//! Error types for imgmin operations.
//!
//! Defines error types for each stage of a batch run:
//! - Plugin construction and invocation
//! - Plugin name resolution
//! - Input acquisition
//! - Output delivery
//! - Batch orchestration

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::config::ConfigError;

/// Errors raised while constructing or invoking a transformation plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("`{program}` is required by the '{plugin}' plugin but was not found on PATH")]
    NotInstalled { plugin: String, program: String },

    #[error("Unknown option '{key}' for plugin '{plugin}'")]
    UnknownOption { plugin: String, key: String },

    #[error("Invalid value for option '{key}' of plugin '{plugin}': {message}")]
    InvalidOption {
        plugin: String,
        key: String,
        message: String,
    },

    #[error("Failed to spawn `{program}`: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("`{program}` exited with {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("`{program}` timed out after {seconds} seconds")]
    Timeout { program: String, seconds: u64 },

    #[error("`{0}` produced no output")]
    EmptyOutput(String),

    #[error("Transformation failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while resolving the requested plugin chain.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin '{name}' could not be loaded: {source}")]
    Construction {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("Invalid plugin specification '{0}'")]
    InvalidSpec(String),

    #[error("No plugins configured")]
    EmptyChain,
}

impl ResolveError {
    /// Name of the plugin that failed to resolve, if any.
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            ResolveError::UnknownPlugin(name) => Some(name),
            ResolveError::Construction { name, .. } => Some(name),
            ResolveError::InvalidSpec(_) | ResolveError::EmptyChain => None,
        }
    }
}

/// Errors that can occur while acquiring the raw input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Specify at least one file path")]
    NoInput,

    #[error("Failed to read stdin: {0}")]
    Stdin(#[from] std::io::Error),
}

/// Errors that can occur while delivering a transformed item.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Cannot write multiple files to stdout, specify an output directory")]
    MultipleToStdout,

    #[error(
        "'{}' and '{}' would both be written to '{}'",
        first.display(),
        second.display(),
        path.display()
    )]
    DuplicateDestination {
        path: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Failed to create directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeliveryError {
    /// Whether the error is a global configuration problem rather than a
    /// failure of a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeliveryError::MultipleToStdout | DeliveryError::DuplicateDestination { .. }
        )
    }
}

/// Errors that stop a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Batch aborted: {0}")]
    Internal(String),
}

impl BatchError {
    /// Configuration errors are reported as a short diagnostic and exit 1;
    /// everything else is unexpected and propagates to `main`.
    pub fn is_fatal_config(&self) -> bool {
        match self {
            BatchError::Config(_) | BatchError::Resolve(_) => true,
            BatchError::Input(InputError::NoInput) => true,
            BatchError::Delivery(err) => err.is_fatal(),
            BatchError::Input(_) | BatchError::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_names_plugin() {
        let err = ResolveError::UnknownPlugin("webp".to_string());
        assert_eq!(err.plugin_name(), Some("webp"));
        assert!(err.to_string().contains("webp"));

        let err = ResolveError::Construction {
            name: "jpegtran".to_string(),
            source: PluginError::NotInstalled {
                plugin: "jpegtran".to_string(),
                program: "jpegtran".to_string(),
            },
        };
        assert_eq!(err.plugin_name(), Some("jpegtran"));
        assert!(err.to_string().contains("PATH"));

        assert_eq!(ResolveError::EmptyChain.plugin_name(), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(BatchError::from(DeliveryError::MultipleToStdout).is_fatal_config());
        assert!(BatchError::from(ResolveError::EmptyChain).is_fatal_config());
        assert!(BatchError::from(InputError::NoInput).is_fatal_config());
        assert!(BatchError::from(DeliveryError::DuplicateDestination {
            path: PathBuf::from("out/x.png"),
            first: PathBuf::from("a/x.png"),
            second: PathBuf::from("b/x.png"),
        })
        .is_fatal_config());

        let write = DeliveryError::Write {
            path: PathBuf::from("out/a.png"),
            source: std::io::Error::other("disk full"),
        };
        assert!(!write.is_fatal());
        assert!(!BatchError::from(write).is_fatal_config());
        assert!(!BatchError::Internal("boom".to_string()).is_fatal_config());
    }

    #[test]
    fn test_multiple_stdout_message() {
        let err = DeliveryError::MultipleToStdout;
        assert_eq!(
            err.to_string(),
            "Cannot write multiple files to stdout, specify an output directory"
        );
    }
}
