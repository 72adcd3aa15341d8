//! Command-line interface for imgmin.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
