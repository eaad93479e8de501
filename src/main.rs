use adt_mcp_gateway::{
    cli::Cli,
    observability::{init_logging, log_config_info},
    GatewayServer, APP_NAME, VERSION,
};
use anyhow::Context;
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before any configuration is read from the environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    let config = cli.resolve_config().context("Failed to load configuration")?;

    init_logging(&config.observability, cli.verbose)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting ADT MCP gateway");
    log_config_info(&config);

    let gateway = GatewayServer::build(config).context("Failed to start gateway")?;
    gateway.run().await?;

    info!("ADT MCP gateway exited");
    Ok(())
}
