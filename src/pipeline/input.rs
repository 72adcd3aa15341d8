//! Input resolution.
//!
//! Turns what the user handed us (a piped buffer or a list of paths and glob
//! patterns) into the ordered list of work items a batch will process.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use super::config::SinkMode;
use crate::error::InputError;

/// Raw input as it arrives from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawInput {
    /// Bytes piped into stdin.
    Buffer(Vec<u8>),
    /// Paths and glob patterns.
    Patterns(Vec<String>),
}

/// Identity of a work item, used in results and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    Path(PathBuf),
    Stdin,
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemSource::Path(path) => write!(f, "{}", path.display()),
            ItemSource::Stdin => write!(f, "<stdin>"),
        }
    }
}

/// A file on disk to transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathItem {
    /// File to read.
    pub source: PathBuf,
    /// Path below the root of the pattern it matched.
    pub relative: PathBuf,
    /// Directory the result is written below; `None` routes to stdout.
    pub destination_dir: Option<PathBuf>,
}

impl PathItem {
    /// Full destination path, if the item has a destination directory.
    pub fn destination(&self) -> Option<PathBuf> {
        self.destination_dir
            .as_ref()
            .map(|dir| dir.join(&self.relative))
    }
}

/// An in-memory buffer to transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferItem {
    pub data: Vec<u8>,
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Path(PathItem),
    Buffer(BufferItem),
}

impl WorkItem {
    pub fn source(&self) -> ItemSource {
        match self {
            WorkItem::Path(item) => ItemSource::Path(item.source.clone()),
            WorkItem::Buffer(_) => ItemSource::Stdin,
        }
    }
}

/// A concrete file produced by glob expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedPath {
    pub path: PathBuf,
    pub relative: PathBuf,
}

/// Decides where the batch input comes from.
///
/// Patterns win whenever any are given. Otherwise the whole of `stdin` is read
/// as one buffer, unless it is an interactive terminal.
///
/// # Errors
///
/// Returns `InputError::NoInput` for an interactive stdin with no patterns,
/// and `InputError::Stdin` if reading fails.
pub async fn acquire<R>(
    patterns: Vec<String>,
    mut stdin: R,
    interactive: bool,
) -> Result<RawInput, InputError>
where
    R: AsyncRead + Unpin,
{
    if !patterns.is_empty() {
        return Ok(RawInput::Patterns(patterns));
    }
    if interactive {
        return Err(InputError::NoInput);
    }

    let mut data = Vec::new();
    stdin.read_to_end(&mut data).await?;
    debug!("Read {} bytes from stdin", data.len());
    Ok(RawInput::Buffer(data))
}

/// Resolves raw input into work items for the given sink.
///
/// A buffer always yields exactly one item and never touches the
/// filesystem. Patterns are expanded to existing regular files; problems with
/// individual patterns are logged and contribute no items.
pub fn resolve(raw: RawInput, sink: &SinkMode) -> Vec<WorkItem> {
    match raw {
        RawInput::Buffer(data) => vec![WorkItem::Buffer(BufferItem { data })],
        RawInput::Patterns(patterns) => expand_patterns(&patterns)
            .into_iter()
            .map(|expanded| {
                let destination_dir = match sink {
                    SinkMode::Stdout => None,
                    SinkMode::Directory(dir) => Some(dir.clone()),
                    SinkMode::InPlace => Some(parent_dir(&expanded.path)),
                };
                let relative = match sink {
                    // Overwrite the file itself, whatever pattern found it.
                    SinkMode::InPlace => file_name(&expanded.path),
                    _ => expanded.relative,
                };
                WorkItem::Path(PathItem {
                    source: expanded.path,
                    relative,
                    destination_dir,
                })
            })
            .collect(),
    }
}

/// Expands paths and glob patterns into existing files, in pattern order,
/// without duplicates. Directories and junk files are skipped.
pub fn expand_patterns(patterns: &[String]) -> Vec<ExpandedPath> {
    let mut seen = HashSet::new();
    let mut expanded = Vec::new();

    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Skipping invalid pattern '{}': {}", pattern, e);
                continue;
            }
        };

        let root = static_prefix(pattern);
        let before = expanded.len();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };
            if !path.is_file() || is_junk(&path) {
                continue;
            }
            if !seen.insert(normalize(&path)) {
                continue;
            }
            let relative = relative_to(&path, &root);
            expanded.push(ExpandedPath { path, relative });
        }

        if expanded.len() == before {
            debug!("Pattern '{}' matched no new files", pattern);
        }
    }

    expanded
}

/// Whether `path` is an OS or editor artefact rather than real content.
pub fn is_junk(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    matches!(
        name,
        ".DS_Store" | ".AppleDouble" | ".LSOverride" | "Thumbs.db" | "ehthumbs.db" | "desktop.ini"
    ) || name.starts_with("._")
        || name.ends_with('~')
        || name.ends_with(".swp")
        || name.ends_with(".swo")
        || name.starts_with(".#")
}

/// The leading part of a pattern that contains no glob metacharacters.
///
/// For a literal path this is its parent directory, so the relative path of a
/// literal file is its file name.
fn static_prefix(pattern: &str) -> PathBuf {
    let pattern_path = Path::new(pattern);
    if !has_glob_meta(pattern) {
        return parent_dir(pattern_path);
    }

    let mut prefix = PathBuf::new();
    for component in pattern_path.components() {
        if has_glob_meta(&component.as_os_str().to_string_lossy()) {
            break;
        }
        prefix.push(component);
    }
    prefix
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    match normalize(path).strip_prefix(normalize(root)) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
        _ => file_name(path),
    }
}

/// Drops `.` components so `./a/b` and `a/b` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn file_name(path: &Path) -> PathBuf {
    path.file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf())
}
