//! Process bridge for plugins backed by external programs.
//!
//! Most optimisers ship as command-line tools. [`ExternalCommand`] locates
//! such a tool on `PATH` once, when the plugin is constructed, and then runs
//! it per item either by streaming bytes through stdin/stdout or, for tools
//! that only work on files, by staging the bytes in a temporary directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::PluginError;

/// Default time budget for a single external invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A resolved external program plus its fixed arguments.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: PathBuf,
    display_name: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalCommand {
    /// Locates `program` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::NotInstalled` if the program cannot be found.
    pub fn locate(plugin: &str, program: &str) -> Result<Self, PluginError> {
        let path = which::which(program).map_err(|_| PluginError::NotInstalled {
            plugin: plugin.to_string(),
            program: program.to_string(),
        })?;
        debug!("Plugin '{}' resolved `{}` to {}", plugin, program, path.display());

        Ok(Self {
            program: path,
            display_name: program.to_string(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the fixed arguments passed on every invocation.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Streams `input` through the program's stdin and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the program cannot be spawned, exits with a
    /// non-zero status, runs past the timeout, or prints nothing.
    pub async fn pipe(&self, input: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| self.spawn_failed(e))?;
        let mut stdin = child.stdin.take().ok_or_else(|| PluginError::SpawnFailed {
            program: self.display_name.clone(),
            message: "failed to capture stdin".to_string(),
        })?;

        let run = async move {
            // Feed stdin while draining stdout so neither side blocks on a full pipe.
            let feed = async move {
                stdin.write_all(&input).await?;
                stdin.shutdown().await
            };
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            (fed, output)
        };

        let (fed, output) = timeout(self.timeout, run)
            .await
            .map_err(|_| self.timed_out())?;
        let output = output?;

        // Programs may exit successfully without reading all of stdin.
        let output = self.check_status(output)?;
        if let Err(e) = fed {
            if e.kind() != ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }
        self.non_empty(output.stdout)
    }

    /// Runs the program against temporary files.
    ///
    /// `input` is written to `<tmp>/input.<extension>`; `extra_args` receives
    /// the input and output paths and returns the per-call arguments that
    /// follow the fixed ones. The output file is read back afterwards.
    pub async fn via_files<F>(
        &self,
        input: Vec<u8>,
        extension: &str,
        extra_args: F,
    ) -> Result<Vec<u8>, PluginError>
    where
        F: FnOnce(&Path, &Path) -> Vec<String>,
    {
        let workdir = tempfile::Builder::new().prefix("imgmin-").tempdir()?;
        let input_path = workdir.path().join(format!("input.{}", extension));
        let output_path = workdir.path().join(format!("output.{}", extension));
        tokio::fs::write(&input_path, &input).await?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(extra_args(&input_path, &output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| self.spawn_failed(e))?;
        self.check_status(output)?;

        let data = tokio::fs::read(&output_path).await?;
        self.non_empty(data)
    }

    fn check_status(&self, output: Output) -> Result<Output, PluginError> {
        if output.status.success() {
            return Ok(output);
        }
        let status = match output.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "a signal".to_string(),
        };
        Err(PluginError::ProcessFailed {
            program: self.display_name.clone(),
            status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn non_empty(&self, data: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        if data.is_empty() {
            Err(PluginError::EmptyOutput(self.display_name.clone()))
        } else {
            Ok(data)
        }
    }

    fn spawn_failed(&self, e: std::io::Error) -> PluginError {
        PluginError::SpawnFailed {
            program: self.display_name.clone(),
            message: e.to_string(),
        }
    }

    fn timed_out(&self) -> PluginError {
        PluginError::Timeout {
            program: self.display_name.clone(),
            seconds: self.timeout.as_secs(),
        }
    }
}
