//! Built-in plugins.
//!
//! | name       | program    | input  | options                          |
//! |------------|------------|--------|----------------------------------|
//! | `gifsicle` | `gifsicle` | GIF    | `level` (1-3), `interlaced`      |
//! | `jpegtran` | `jpegtran` | JPEG   | `progressive`, `arithmetic`      |
//! | `optipng`  | `optipng`  | PNG    | `level` (0-7)                    |
//! | `svgo`     | `svgo`     | SVG    | `multipass`                      |
//! | `exec`     | `cmd`      | any    | `cmd` (required), `args`         |
//! | `identity` | -          | any    | -                                |

use std::sync::Arc;

use async_trait::async_trait;

use super::external::ExternalCommand;
use super::registry::{BuildContext, PluginRegistry};
use super::{ImageFormat, Plugin, PluginHandle};
use crate::error::PluginError;

/// Registers every built-in plugin.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register("gifsicle", gifsicle);
    registry.register("jpegtran", jpegtran);
    registry.register("optipng", optipng);
    registry.register("svgo", svgo);
    registry.register("exec", exec);
    registry.register("identity", identity);
}

/// Returns its input unchanged.
#[derive(Debug, Default)]
pub struct Identity;

#[async_trait]
impl Plugin for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    async fn transform(&self, input: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        Ok(input)
    }
}

/// How bytes reach the external program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Through stdin, result on stdout.
    Pipe,
    /// Through a temporary input file; the program writes an output file
    /// given after `-out`.
    Files,
}

/// A plugin backed by an external optimiser program.
#[derive(Debug)]
pub struct ExternalOptimizer {
    name: String,
    format: Option<ImageFormat>,
    command: ExternalCommand,
    invocation: Invocation,
}

impl ExternalOptimizer {
    pub fn new(
        name: impl Into<String>,
        format: Option<ImageFormat>,
        command: ExternalCommand,
        invocation: Invocation,
    ) -> Self {
        Self {
            name: name.into(),
            format,
            command,
            invocation,
        }
    }
}

#[async_trait]
impl Plugin for ExternalOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, input: &[u8]) -> bool {
        match self.format {
            Some(format) => format.matches(input),
            None => true,
        }
    }

    async fn transform(&self, input: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        match self.invocation {
            Invocation::Pipe => self.command.pipe(input).await,
            Invocation::Files => {
                let extension = self.format.map(ImageFormat::extension).unwrap_or("bin");
                self.command
                    .via_files(input, extension, |input, output| {
                        vec![
                            "-out".to_string(),
                            output.display().to_string(),
                            input.display().to_string(),
                        ]
                    })
                    .await
            }
        }
    }
}

fn identity(ctx: BuildContext<'_>) -> Result<PluginHandle, PluginError> {
    ctx.options.ensure_known(ctx.name, &[])?;
    Ok(Arc::new(Identity))
}

fn gifsicle(ctx: BuildContext<'_>) -> Result<PluginHandle, PluginError> {
    ctx.options.ensure_known(ctx.name, &["level", "interlaced"])?;
    let level = ctx.options.level_or(ctx.name, "level", 1..=3, 3)?;
    let interlaced = ctx.options.bool_or(ctx.name, "interlaced", false)?;

    let mut args = vec![
        "--no-warnings".to_string(),
        "--no-app-extensions".to_string(),
        format!("--optimize={}", level),
    ];
    if interlaced {
        args.push("--interlace".to_string());
    }

    let command = ExternalCommand::locate(ctx.name, "gifsicle")?
        .with_args(args)
        .with_timeout(ctx.timeout);
    Ok(Arc::new(ExternalOptimizer::new(
        ctx.name,
        Some(ImageFormat::Gif),
        command,
        Invocation::Pipe,
    )))
}

fn jpegtran(ctx: BuildContext<'_>) -> Result<PluginHandle, PluginError> {
    ctx.options.ensure_known(ctx.name, &["progressive", "arithmetic"])?;
    let progressive = ctx.options.bool_or(ctx.name, "progressive", false)?;
    let arithmetic = ctx.options.bool_or(ctx.name, "arithmetic", false)?;

    let mut args = vec!["-copy".to_string(), "none".to_string()];
    // Huffman optimisation and arithmetic coding are mutually exclusive.
    if arithmetic {
        args.push("-arithmetic".to_string());
    } else {
        args.push("-optimize".to_string());
    }
    if progressive {
        args.push("-progressive".to_string());
    }

    let command = ExternalCommand::locate(ctx.name, "jpegtran")?
        .with_args(args)
        .with_timeout(ctx.timeout);
    Ok(Arc::new(ExternalOptimizer::new(
        ctx.name,
        Some(ImageFormat::Jpeg),
        command,
        Invocation::Pipe,
    )))
}

fn optipng(ctx: BuildContext<'_>) -> Result<PluginHandle, PluginError> {
    ctx.options.ensure_known(ctx.name, &["level"])?;
    let level = ctx.options.level_or(ctx.name, "level", 0..=7, 3)?;

    let command = ExternalCommand::locate(ctx.name, "optipng")?
        .with_args([
            "-strip".to_string(),
            "all".to_string(),
            "-clobber".to_string(),
            "-fix".to_string(),
            "-quiet".to_string(),
            format!("-o{}", level),
        ])
        .with_timeout(ctx.timeout);
    Ok(Arc::new(ExternalOptimizer::new(
        ctx.name,
        Some(ImageFormat::Png),
        command,
        Invocation::Files,
    )))
}

fn svgo(ctx: BuildContext<'_>) -> Result<PluginHandle, PluginError> {
    ctx.options.ensure_known(ctx.name, &["multipass"])?;
    let multipass = ctx.options.bool_or(ctx.name, "multipass", false)?;

    let mut args = vec![
        "--input".to_string(),
        "-".to_string(),
        "--output".to_string(),
        "-".to_string(),
    ];
    if multipass {
        args.push("--multipass".to_string());
    }

    let command = ExternalCommand::locate(ctx.name, "svgo")?
        .with_args(args)
        .with_timeout(ctx.timeout);
    Ok(Arc::new(ExternalOptimizer::new(
        ctx.name,
        Some(ImageFormat::Svg),
        command,
        Invocation::Pipe,
    )))
}

fn exec(ctx: BuildContext<'_>) -> Result<PluginHandle, PluginError> {
    ctx.options.ensure_known(ctx.name, &["cmd", "args"])?;
    let program = ctx
        .options
        .get("cmd")
        .filter(|cmd| !cmd.is_empty())
        .ok_or_else(|| PluginError::InvalidOption {
            plugin: ctx.name.to_string(),
            key: "cmd".to_string(),
            message: "a program name is required".to_string(),
        })?;
    let args: Vec<String> = ctx
        .options
        .get("args")
        .map(|args| args.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let command = ExternalCommand::locate(ctx.name, program)?
        .with_args(args)
        .with_timeout(ctx.timeout);
    Ok(Arc::new(ExternalOptimizer::new(
        ctx.name,
        None,
        command,
        Invocation::Pipe,
    )))
}
