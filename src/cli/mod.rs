//! CLI module for the stackform tool.
//!
//! This module provides the command-line interface for planning and
//! applying CloudStack manifests.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
