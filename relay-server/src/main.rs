#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings)]

//! Main entry point for the Relay server CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use relay_shared::config::server::Config;
use std::error::Error;
use std::path::PathBuf;

/// Main CLI structure for the Relay server
#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Real-time chat relay with durable, replayable history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the Relay CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Serve {
        /// The port number to bind the server to. Overrides the configuration
        /// file and the `RELAY_SERVER_PORT` environment variable.
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the configuration file (e.g., config.yaml or config.json).
        /// If not provided, defaults and environment variables are used.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Initializes environment variables and returns the parsed CLI.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Handles the serve command by loading configuration and starting the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved_config = Config::load_config(config, port)?;
    relay_server::server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => {
            handle_serve_command(port, config).await?;
        }
    }

    Ok(())
}
