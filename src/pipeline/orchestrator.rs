//! Batch orchestrator.
//!
//! Drives one batch through `Idle -> Dispatching -> Aggregating -> Done`:
//! every work item becomes an independent future bounded by a semaphore,
//! each settled result is routed to its sink, and a join barrier waits for
//! all items before the summary is produced.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

use super::config::{DispatchConfig, SinkMode};
use super::input::WorkItem;
use super::output::{DeliveryOutcome, OutputRouter};
use super::runner::{ItemFailure, TransformRunner};
use crate::error::{BatchError, DeliveryError, ResolveError};
use crate::plugin::PluginHandle;

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    #[default]
    Idle,
    Dispatching,
    Aggregating,
    Done,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Idle => write!(f, "idle"),
            BatchState::Dispatching => write!(f, "dispatching"),
            BatchState::Aggregating => write!(f, "aggregating"),
            BatchState::Done => write!(f, "done"),
        }
    }
}

/// Final result of a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Number of items that were transformed and delivered.
    pub processed: usize,
    /// Per-item failures, in completion order.
    pub failures: Vec<ItemFailure>,
    /// Paths written in directory or in-place mode.
    pub written: Vec<PathBuf>,
    /// Bytes for stdout, present only for a single stdout-bound item.
    #[serde(skip)]
    pub stdout: Option<Vec<u8>>,
    /// Total input size of delivered items.
    pub bytes_in: u64,
    /// Total output size of delivered items.
    pub bytes_out: u64,
    /// Wall-clock time of the batch.
    #[serde(skip)]
    pub duration: Duration,
}

impl BatchSummary {
    /// The `N image(s) minified` line.
    pub fn message(&self) -> String {
        format!(
            "{} {} minified",
            self.processed,
            plural("image", self.processed)
        )
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit status for this batch.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Bytes saved across delivered items; negative when outputs grew.
    pub fn bytes_saved(&self) -> i64 {
        self.bytes_in as i64 - self.bytes_out as i64
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Written {
                path,
                original_size,
                size,
            } => {
                self.processed += 1;
                self.bytes_in += original_size as u64;
                self.bytes_out += size as u64;
                self.written.push(path);
            }
            DeliveryOutcome::Deferred {
                data,
                original_size,
            } => {
                self.processed += 1;
                self.bytes_in += original_size as u64;
                self.bytes_out += data.len() as u64;
                self.stdout = Some(data);
            }
            DeliveryOutcome::Failed(failure) => self.record_failure(failure),
        }
    }

    fn record_failure(&mut self, failure: ItemFailure) {
        debug!("Item failed: {}: {}", failure.source, failure.reason);
        self.failures.push(failure);
    }
}

fn plural(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

/// Coordinates a batch: transform, route, aggregate.
pub struct BatchOrchestrator {
    runner: TransformRunner,
    sink: SinkMode,
    concurrency_limiter: Arc<Semaphore>,
    state: Arc<RwLock<BatchState>>,
}

impl BatchOrchestrator {
    /// Creates an orchestrator for an already resolved plugin chain.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::Config` if the configuration is invalid and
    /// `BatchError::Resolve` if the chain is empty.
    pub fn new(plugins: Vec<PluginHandle>, config: &DispatchConfig) -> Result<Self, BatchError> {
        config.validate()?;
        if plugins.is_empty() {
            return Err(ResolveError::EmptyChain.into());
        }

        Ok(Self {
            runner: TransformRunner::new(plugins),
            sink: config.sink.clone(),
            concurrency_limiter: Arc::new(Semaphore::new(config.max_concurrency)),
            state: Arc::new(RwLock::new(BatchState::Idle)),
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> BatchState {
        *self.state.read().await
    }

    pub fn sink(&self) -> &SinkMode {
        &self.sink
    }

    /// Runs every item to completion and aggregates the results.
    ///
    /// Per-item failures are collected in the summary. Items already in
    /// flight always finish before an error is returned.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::Delivery` before any work starts when several
    /// items target stdout or two items share a destination path, and after
    /// the barrier if delivery hits the stdout condition anyway.
    pub async fn run(&self, items: Vec<WorkItem>) -> Result<BatchSummary, BatchError> {
        let started = Instant::now();
        let router = OutputRouter::new(self.sink.clone(), items.len());
        router.preflight(&items)?;

        info!(
            "Dispatching {} item(s) through [{}] to {}",
            items.len(),
            self.runner.plugin_names().join(", "),
            self.sink
        );
        self.set_state(BatchState::Dispatching).await;

        let futures: Vec<_> = items
            .into_iter()
            .map(|item| self.process(item, &router))
            .collect();
        let outcomes = futures::future::join_all(futures).await;

        self.set_state(BatchState::Aggregating).await;
        let mut summary = BatchSummary::default();
        let mut fatal = None;
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => summary.record(outcome),
                Err(ItemOutcomeError::Fatal(err)) => fatal = Some(err),
                Err(ItemOutcomeError::Item(failure)) => summary.record_failure(failure),
            }
        }
        summary.duration = started.elapsed();
        self.set_state(BatchState::Done).await;

        if let Some(err) = fatal {
            return Err(err.into());
        }

        info!(
            "Batch done in {:?}: {} processed, {} failed",
            summary.duration,
            summary.processed,
            summary.failures.len()
        );
        Ok(summary)
    }

    async fn process(
        &self,
        item: WorkItem,
        router: &OutputRouter,
    ) -> Result<DeliveryOutcome, ItemOutcomeError> {
        let source = item.source();
        let _permit = self.concurrency_limiter.acquire().await.map_err(|e| {
            ItemOutcomeError::Item(ItemFailure::new(
                source.clone(),
                format!("Failed to acquire permit: {}", e),
            ))
        })?;

        debug!("Transforming {}", source);
        let result = self.runner.run(item).await;
        match router.deliver(result).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_fatal() => Err(ItemOutcomeError::Fatal(err)),
            Err(err) => Err(ItemOutcomeError::Item(ItemFailure::new(
                source,
                err.to_string(),
            ))),
        }
    }

    async fn set_state(&self, state: BatchState) {
        debug!("Batch state -> {}", state);
        *self.state.write().await = state;
    }
}

enum ItemOutcomeError {
    Fatal(DeliveryError),
    Item(ItemFailure),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::pipeline::input::{self, BufferItem, RawInput};
    use crate::plugin::Plugin;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upper;

    #[async_trait]
    impl Plugin for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn transform(&self, input: Vec<u8>) -> Result<Vec<u8>, PluginError> {
            Ok(input.to_ascii_uppercase())
        }
    }

    /// Fails on inputs containing `bad`.
    struct Picky;

    #[async_trait]
    impl Plugin for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        async fn transform(&self, input: Vec<u8>) -> Result<Vec<u8>, PluginError> {
            if input.windows(3).any(|w| w == b"bad") {
                return Err(PluginError::Failed("rejected".to_string()));
            }
            Ok(input)
        }
    }

    /// Tracks the peak number of concurrent transforms.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Plugin for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn transform(&self, input: Vec<u8>) -> Result<Vec<u8>, PluginError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(input)
        }
    }

    fn config(sink: SinkMode) -> DispatchConfig {
        DispatchConfig::new().with_sink(sink).with_max_concurrency(4)
    }

    fn write_tree(root: &std::path::Path, files: &[(&str, &[u8])]) {
        for (name, data) in files {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
    }

    #[test]
    fn test_summary_message() {
        let mut summary = BatchSummary::default();
        assert_eq!(summary.message(), "0 images minified");
        summary.processed = 1;
        assert_eq!(summary.message(), "1 image minified");
        summary.processed = 3;
        assert_eq!(summary.message(), "3 images minified");
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_oversized_concurrency_is_config_error() {
        let config = DispatchConfig::new().with_max_concurrency(usize::MAX);
        let result = BatchOrchestrator::new(vec![Arc::new(Upper)], &config);
        match result {
            Err(err) => assert!(err.is_fatal_config()),
            Ok(_) => panic!("oversized concurrency was accepted"),
        }
    }

    #[test]
    fn test_empty_chain_rejected() {
        let result = BatchOrchestrator::new(Vec::new(), &DispatchConfig::default());
        assert!(matches!(
            result,
            Err(BatchError::Resolve(ResolveError::EmptyChain))
        ));
    }

    #[tokio::test]
    async fn test_single_buffer_goes_to_stdout() {
        let orchestrator =
            BatchOrchestrator::new(vec![Arc::new(Upper)], &config(SinkMode::Stdout)).unwrap();
        assert_eq!(orchestrator.state().await, BatchState::Idle);

        let items = vec![WorkItem::Buffer(BufferItem {
            data: b"abc".to_vec(),
        })];
        let summary = orchestrator.run(items).await.unwrap();

        assert_eq!(summary.stdout, Some(b"ABC".to_vec()));
        assert_eq!(summary.processed, 1);
        assert!(summary.written.is_empty());
        assert_eq!(orchestrator.state().await, BatchState::Done);
    }

    #[tokio::test]
    async fn test_multiple_items_to_stdout_is_fatal_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("a.txt", b"a"), ("b.txt", b"b")]);
        let pattern = format!("{}/*.txt", dir.path().display());
        let items = input::resolve(RawInput::Patterns(vec![pattern]), &SinkMode::Stdout);
        assert_eq!(items.len(), 2);

        let orchestrator =
            BatchOrchestrator::new(vec![Arc::new(Upper)], &config(SinkMode::Stdout)).unwrap();
        let err = orchestrator.run(items).await.unwrap_err();
        assert!(err.is_fatal_config());
        assert_eq!(orchestrator.state().await, BatchState::Idle);
    }

    #[tokio::test]
    async fn test_shared_destination_is_fatal_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("a/x.txt", b"a"), ("b/x.txt", b"b")]);
        let out = dir.path().join("out");
        let sink = SinkMode::Directory(out.clone());
        let patterns = vec![
            dir.path().join("a/x.txt").display().to_string(),
            dir.path().join("b/x.txt").display().to_string(),
        ];
        let items = input::resolve(RawInput::Patterns(patterns), &sink);

        let orchestrator = BatchOrchestrator::new(vec![Arc::new(Upper)], &config(sink)).unwrap();
        let err = orchestrator.run(items).await.unwrap_err();
        assert!(matches!(
            err,
            BatchError::Delivery(DeliveryError::DuplicateDestination { .. })
        ));
        assert_eq!(orchestrator.state().await, BatchState::Idle);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_zero_items() {
        let orchestrator =
            BatchOrchestrator::new(vec![Arc::new(Upper)], &config(SinkMode::Stdout)).unwrap();
        let summary = orchestrator.run(Vec::new()).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert!(summary.stdout.is_none());
        assert_eq!(summary.message(), "0 images minified");
    }

    #[tokio::test]
    async fn test_directory_mode_mirrors_tree() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_tree(
            src.path(),
            &[("a.txt", b"one"), ("nested/b.txt", b"two")],
        );
        let sink = SinkMode::Directory(out.path().to_path_buf());
        let pattern = format!("{}/**/*.txt", src.path().display());
        let items = input::resolve(RawInput::Patterns(vec![pattern]), &sink);

        let orchestrator = BatchOrchestrator::new(vec![Arc::new(Upper)], &config(sink)).unwrap();
        let summary = orchestrator.run(items).await.unwrap();

        assert_eq!(summary.message(), "2 images minified");
        assert_eq!(std::fs::read(out.path().join("a.txt")).unwrap(), b"ONE");
        assert_eq!(
            std::fs::read(out.path().join("nested/b.txt")).unwrap(),
            b"TWO"
        );
        assert_eq!(summary.bytes_in, 6);
        assert_eq!(summary.bytes_out, 6);
        assert_eq!(summary.bytes_saved(), 0);
    }

    #[tokio::test]
    async fn test_in_place_overwrites_sources() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("a/b.png", b"png")]);
        let pattern = dir.path().join("a/b.png").display().to_string();
        let items = input::resolve(RawInput::Patterns(vec![pattern]), &SinkMode::InPlace);

        let orchestrator =
            BatchOrchestrator::new(vec![Arc::new(Upper)], &config(SinkMode::InPlace)).unwrap();
        let summary = orchestrator.run(items).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.written, vec![dir.path().join("a/b.png")]);
        assert_eq!(std::fs::read(dir.path().join("a/b.png")).unwrap(), b"PNG");
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_tree(
            src.path(),
            &[("good1.txt", b"fine"), ("bad.txt", b"bad"), ("good2.txt", b"ok")],
        );
        let sink = SinkMode::Directory(out.path().to_path_buf());
        let pattern = format!("{}/*.txt", src.path().display());
        let items = input::resolve(RawInput::Patterns(vec![pattern]), &sink);

        let orchestrator = BatchOrchestrator::new(
            vec![Arc::new(Picky), Arc::new(Upper)],
            &config(sink),
        )
        .unwrap();
        let summary = orchestrator.run(items).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].source.to_string().contains("bad.txt"));
        assert!(summary.failures[0].reason.contains("rejected"));
        assert_eq!(summary.exit_code(), 1);
        assert!(!out.path().join("bad.txt").exists());
        assert_eq!(std::fs::read(out.path().join("good1.txt")).unwrap(), b"FINE");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let out = tempfile::tempdir().unwrap();
        let sink = SinkMode::Directory(out.path().to_path_buf());
        let config = DispatchConfig::new()
            .with_sink(sink)
            .with_max_concurrency(2);
        let handle: PluginHandle = gauge.clone();
        let orchestrator = BatchOrchestrator::new(vec![handle], &config).unwrap();

        let src = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..6).map(|i| format!("{}.txt", i)).collect();
        for name in &names {
            std::fs::write(src.path().join(name), b"x").unwrap();
        }
        let pattern = format!("{}/*.txt", src.path().display());
        let items = input::resolve(RawInput::Patterns(vec![pattern]), orchestrator.sink());

        let summary = orchestrator.run(items).await.unwrap();
        assert_eq!(summary.processed, 6);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 1);
    }
}
