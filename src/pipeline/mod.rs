//! Batch pipeline for image minification.
//!
//! This module turns raw input into work items, runs the plugin chain over
//! each of them concurrently, and routes the results to their sink.
//!
//! # Architecture
//!
//! - **Config**: Plugin chain, sink mode and execution limits
//! - **Input**: Glob expansion, junk filtering and destination mapping
//! - **Runner**: Applies the ordered plugin chain to one item
//! - **Output**: Writes results to stdout, a directory, or back in place
//! - **Orchestrator**: Dispatches items, aggregates results, builds the summary
//!
//! # Pipeline Flow
//!
//! 1. **Input Resolution**: Patterns are expanded, or stdin becomes one buffer
//! 2. **Dispatch**: Every item is transformed as an independent future
//! 3. **Delivery**: Each settled result is written to its sink
//! 4. **Summary**: After all items settle, successes and failures are reported
//!
//! # Example
//!
//! ```rust,ignore
//! use imgmin::pipeline::{input, BatchOrchestrator, DispatchConfig, RawInput, SinkMode};
//! use imgmin::plugin::PluginRegistry;
//!
//! let config = DispatchConfig::new()
//!     .with_sink(SinkMode::Directory("build".into()))
//!     .with_max_concurrency(4);
//!
//! let plugins = PluginRegistry::with_builtins().resolve(&config.plugins)?;
//! let items = input::resolve(RawInput::Patterns(vec!["images/*.png".into()]), &config.sink);
//!
//! let orchestrator = BatchOrchestrator::new(plugins, &config)?;
//! let summary = orchestrator.run(items).await?;
//! println!("{}", summary.message());
//! ```

pub mod config;
pub mod input;
pub mod orchestrator;
pub mod output;
pub mod runner;

pub use config::{ConfigError, DispatchConfig, SinkMode};
pub use input::{ItemSource, RawInput, WorkItem};
pub use orchestrator::{BatchOrchestrator, BatchState, BatchSummary};
pub use output::{DeliveryOutcome, OutputRouter};
pub use runner::{ItemFailure, RunError, TransformResult, TransformRunner, TransformedItem};
