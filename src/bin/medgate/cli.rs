//! Command-line interface definition.

use clap::Parser;
use medgate::GatewayConfig;
use std::path::PathBuf;

/// Cross-chain payment verification and access-grant gateway.
#[derive(Parser, Debug)]
#[command(name = "medgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Source ledger JSON-RPC endpoint URLs.
    #[arg(long = "ledger-endpoint", env = "MEDGATE_LEDGER_ENDPOINTS", value_delimiter = ',')]
    pub ledger_endpoints: Vec<String>,

    /// Attestation oracle endpoint URLs.
    #[arg(long = "oracle-endpoint", env = "MEDGATE_ORACLE_ENDPOINTS", value_delimiter = ',')]
    pub oracle_endpoints: Vec<String>,

    /// Wallet address that receives hospital payments.
    #[arg(long, env = "MEDGATE_DESTINATION_WALLET")]
    pub destination_wallet: Option<String>,

    /// Wallet-injected fallback RPC URL for the ledger pool.
    #[arg(long, env = "MEDGATE_FALLBACK_RPC")]
    pub fallback_rpc: Option<String>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Convert CLI arguments into a `GatewayConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be
    /// loaded.
    pub fn into_config(self) -> color_eyre::Result<GatewayConfig> {
        // Start with default config or load from file.
        let mut config = if let Some(ref path) = self.config {
            GatewayConfig::from_file(path)?
        } else {
            GatewayConfig::default()
        };

        // Override with CLI arguments.
        if !self.ledger_endpoints.is_empty() {
            config.ledger.endpoints = self.ledger_endpoints;
        }
        if !self.oracle_endpoints.is_empty() {
            config.oracle.endpoints = self.oracle_endpoints;
        }
        if let Some(wallet) = self.destination_wallet {
            config.ledger.destination_wallet = wallet;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
