//! medgate CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use medgate::GatewayBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("medgate v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let fallback = cli.fallback_rpc.clone();
    let config = cli.into_config()?;

    // Build and run the gateway
    let mut builder = GatewayBuilder::new(config);
    if let Some(url) = fallback {
        builder = builder.with_fallback_rpc(url);
    }
    let mut gateway = builder.build().await?;

    // Run until shutdown
    gateway.run().await?;

    info!("Goodbye!");
    Ok(())
}
