//! Only1MCP - MCP server aggregator CLI.
//!
//! Starts the HTTP front door onto the aggregator `Facade`, or performs
//! read-only operations (config validation, listing configured backends)
//! without starting a server.

use clap::{Parser, Subcommand};
use only1mcp::{config, proxy, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "only1mcp")]
#[command(about = "MCP server aggregator", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "ONLY1MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ONLY1MCP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the aggregator's HTTP front door
    Start {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate a configuration file without starting anything
    Validate {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List the MCP servers configured for aggregation
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    info!("Only1MCP v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let server = proxy::ProxyServer::new(config).await?;
            server.run().await?;
        }

        Commands::Validate { config: path } => match config::Config::validate_file(&path) {
            Ok(()) => {
                println!("Configuration valid");
            }
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                std::process::exit(1);
            }
        },

        Commands::List => {
            let config = load_config(cli.config.as_ref())?;
            println!("Configured MCP servers:");
            for server in &config.servers {
                println!(
                    "  - {} ({}): {:?}{}",
                    server.id,
                    server.name,
                    server.transport,
                    if server.enabled { "" } else { " [disabled]" }
                );
            }
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&PathBuf>) -> Result<config::Config> {
    match explicit {
        Some(path) => config::Config::from_file(path),
        None => config::Config::discover_and_load(),
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
