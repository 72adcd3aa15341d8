//! Output routing.
//!
//! Decides where a transformed item goes under the active [`SinkMode`] and
//! performs the write. Bytes bound for stdout are handed back to the caller
//! instead of being written here, so stdout only ever carries one payload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::config::SinkMode;
use super::input::WorkItem;
use super::runner::{ItemFailure, TransformResult};
use crate::error::DeliveryError;

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Bytes were written to this path.
    Written {
        path: PathBuf,
        original_size: usize,
        size: usize,
    },
    /// Bytes are for stdout; the caller writes them.
    Deferred { data: Vec<u8>, original_size: usize },
    /// The item failed; nothing was written.
    Failed(ItemFailure),
}

/// Routes transformed items to their sink.
#[derive(Debug, Clone)]
pub struct OutputRouter {
    sink: SinkMode,
    multi_item: bool,
}

impl OutputRouter {
    /// Creates a router for a batch of `item_count` items.
    pub fn new(sink: SinkMode, item_count: usize) -> Self {
        Self {
            sink,
            multi_item: item_count > 1,
        }
    }

    pub fn sink(&self) -> &SinkMode {
        &self.sink
    }

    /// Checks the batch shape before anything is dispatched.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::MultipleToStdout` when several items would all
    /// target stdout, and `DeliveryError::DuplicateDestination` when two
    /// inputs map to the same output path.
    pub fn preflight(&self, items: &[WorkItem]) -> Result<(), DeliveryError> {
        if self.sink.is_stdout() && self.multi_item {
            return Err(DeliveryError::MultipleToStdout);
        }

        let mut claimed: HashMap<PathBuf, &Path> = HashMap::new();
        for item in items {
            let WorkItem::Path(path_item) = item else {
                continue;
            };
            let Some(destination) = path_item.destination() else {
                continue;
            };
            if let Some(first) = claimed.get(&destination) {
                return Err(DeliveryError::DuplicateDestination {
                    path: destination,
                    first: first.to_path_buf(),
                    second: path_item.source.clone(),
                });
            }
            claimed.insert(destination, &path_item.source);
        }
        Ok(())
    }

    /// Delivers one result.
    ///
    /// # Errors
    ///
    /// Returns `MultipleToStdout` for a stdout-bound item in a multi-item
    /// batch, and `CreateDir`/`Write` when the filesystem refuses the output.
    pub async fn deliver(&self, result: TransformResult) -> Result<DeliveryOutcome, DeliveryError> {
        let item = match result {
            Ok(item) => item,
            Err(failure) => return Ok(DeliveryOutcome::Failed(failure)),
        };

        let Some(path) = item.destination else {
            if self.multi_item {
                return Err(DeliveryError::MultipleToStdout);
            }
            return Ok(DeliveryOutcome::Deferred {
                data: item.data,
                original_size: item.original_size,
            });
        };

        write_file(&path, &item.data).await?;
        debug!(
            "Wrote {} ({} -> {} bytes)",
            path.display(),
            item.original_size,
            item.data.len()
        );
        Ok(DeliveryOutcome::Written {
            path,
            original_size: item.original_size,
            size: item.data.len(),
        })
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), DeliveryError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DeliveryError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, data)
        .await
        .map_err(|source| DeliveryError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::{ItemSource, PathItem};
    use crate::pipeline::runner::TransformedItem;

    fn transformed(data: &[u8], destination: Option<PathBuf>) -> TransformResult {
        Ok(TransformedItem {
            source: ItemSource::Stdin,
            data: data.to_vec(),
            original_size: data.len() + 10,
            destination,
        })
    }

    #[tokio::test]
    async fn test_single_stdout_item_is_deferred() {
        let router = OutputRouter::new(SinkMode::Stdout, 1);
        assert!(router.preflight(&[]).is_ok());
        let outcome = router.deliver(transformed(b"raw", None)).await.unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Deferred {
                data: b"raw".to_vec(),
                original_size: 13
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_stdout_items_rejected() {
        let router = OutputRouter::new(SinkMode::Stdout, 2);
        assert!(matches!(
            router.preflight(&[]),
            Err(DeliveryError::MultipleToStdout)
        ));
        assert!(matches!(
            router.deliver(transformed(b"raw", None)).await,
            Err(DeliveryError::MultipleToStdout)
        ));
    }

    #[tokio::test]
    async fn test_zero_items_to_stdout_is_fine() {
        assert!(OutputRouter::new(SinkMode::Stdout, 0).preflight(&[]).is_ok());
    }

    fn path_item(source: &str, relative: &str, destination_dir: &str) -> WorkItem {
        WorkItem::Path(PathItem {
            source: PathBuf::from(source),
            relative: PathBuf::from(relative),
            destination_dir: Some(PathBuf::from(destination_dir)),
        })
    }

    #[test]
    fn test_colliding_destinations_rejected() {
        let items = vec![
            path_item("a/x.png", "x.png", "out"),
            path_item("b/y.png", "y.png", "out"),
            path_item("b/x.png", "x.png", "out"),
        ];
        let router = OutputRouter::new(SinkMode::Directory(PathBuf::from("out")), items.len());

        match router.preflight(&items) {
            Err(err @ DeliveryError::DuplicateDestination { .. }) => {
                assert!(err.is_fatal());
                let message = err.to_string();
                assert!(message.contains("a/x.png"));
                assert!(message.contains("b/x.png"));
                assert!(message.contains("out/x.png"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_distinct_destinations_accepted() {
        let items = vec![
            path_item("a/x.png", "a/x.png", "out"),
            path_item("b/x.png", "b/x.png", "out"),
        ];
        let router = OutputRouter::new(SinkMode::Directory(PathBuf::from("out")), items.len());
        assert!(router.preflight(&items).is_ok());
    }

    #[tokio::test]
    async fn test_writes_create_parents_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/deeper/out.png");
        let router = OutputRouter::new(SinkMode::Directory(dir.path().to_path_buf()), 3);

        router
            .deliver(transformed(b"first", Some(target.clone())))
            .await
            .unwrap();
        let outcome = router
            .deliver(transformed(b"second", Some(target.clone())))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        assert_eq!(
            outcome,
            DeliveryOutcome::Written {
                path: target,
                original_size: 16,
                size: 6
            }
        );
    }

    #[tokio::test]
    async fn test_failures_write_nothing() {
        let router = OutputRouter::new(SinkMode::Stdout, 1);
        let failure = ItemFailure::new(ItemSource::Stdin, "bad");
        let outcome = router.deliver(Err(failure.clone())).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Failed(failure));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_error_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let router = OutputRouter::new(SinkMode::InPlace, 1);
        let err = router
            .deliver(transformed(b"data", Some(blocker.join("child.png"))))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }
}
