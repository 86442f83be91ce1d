//! CLI argument types - shared between binary and tests

use crate::config::LogFormat;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "supermcp-client")]
#[command(about = "Connection manager for MCP tool servers over stdio, containers, npx and SSE/WebSocket")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SUPERMCP_CONFIG", global = true)]
    pub config: Option<String>,
    /// Log level (overridden by RUST_LOG)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect configured clients and keep them healthy until interrupted
    Serve,
    /// List tools of one or all configured clients
    Tools(ToolsArgs),
    /// Call a tool on a configured client
    Call(CallArgs),
    /// Inspect the configuration format
    Config(ConfigArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Parser, Debug)]
pub struct ToolsArgs {
    /// Only this client
    #[arg(long)]
    pub client: Option<String>,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Client id
    pub client: String,
    /// Tool name
    pub tool: String,
    /// Tool arguments as a JSON object
    #[arg(short, long)]
    pub args: Option<String>,
    /// Print the raw result as JSON
    #[arg(short, long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the JSON schema of the configuration file
    Schema,
    /// Print an example configuration
    Example,
}
