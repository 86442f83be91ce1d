//! CLI command implementations

pub mod args;
pub mod commands;

pub use args::{CallArgs, Cli, Command, ConfigArgs, ConfigCommand, OutputFormat, ToolsArgs};
