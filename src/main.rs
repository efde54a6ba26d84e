//! Toolmux - MCP stdio client and tool multiplexer CLI
//!
#![doc = "Toolmux - MCP stdio client and tool multiplexer CLI"]
#![doc = "Main entry point for the toolmux binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolmux::cli::{Cli, Commands};
use toolmux::commands;
use toolmux::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Servers => commands::mcp::handle_servers(&config),
        Commands::Tools { json } => {
            tracing::info!("Listing tools from {} server(s)", config.servers.len());
            commands::mcp::handle_tools(&config, json).await
        }
        Commands::Call {
            name,
            args,
            tool_use_id,
        } => {
            tracing::debug!("Calling {} with {}", name, args);
            commands::mcp::handle_call(&config, &name, &args, &tool_use_id).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "toolmux=debug" } else { "toolmux=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
