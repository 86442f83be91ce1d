use clap::Parser;
use supermcp_client::cli::commands;
use supermcp_client::cli::{Cli, Command, ConfigCommand};
use supermcp_client::config::ConfigManager;
use supermcp_client::utils::init_logging;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let result = match cli.command {
        Command::Serve => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::serve(config).await
        }
        Command::Tools(args) => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::list_tools(config, args.client.as_deref(), args.format).await
        }
        Command::Call(args) => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::call_tool(
                config,
                &args.client,
                &args.tool,
                args.args.as_deref(),
                args.json,
            )
            .await
        }
        Command::Config(args) => match args.command {
            ConfigCommand::Schema => ConfigManager::schema().map(|s| println!("{}", s)),
            ConfigCommand::Example => ConfigManager::example_toml().map(|s| println!("{}", s)),
        },
    };

    if let Err(e) = &result {
        error!(code = e.error_code(), "{}", e);
    }
    Ok(result?)
}
