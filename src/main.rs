use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use atelier::config::AtelierToml;
use atelier::coordinator::server;

#[derive(Parser)]
#[command(name = "atelier")]
#[command(version, about = "Live collaboration coordinator for multi-agent coding")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to atelier.toml. Defaults to ./atelier.toml if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the coordinator server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Default working directory for terminal sessions
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Bind on all interfaces and allow any CORS origin
        #[arg(long)]
        dev: bool,
    },
    /// Print the effective configuration
    Config,
}

fn load_config(cli: &Cli) -> Result<AtelierToml> {
    let mut config = match &cli.config {
        Some(path) => AtelierToml::load(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            AtelierToml::load_or_default(&cwd)?
        }
    };
    config.apply_env();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match &cli.command {
        Commands::Serve {
            port,
            workspace,
            dev,
        } => {
            let config = load_config(&cli)?;
            let mut server_config = config.into_server_config();
            if let Some(port) = port {
                server_config.port = *port;
            }
            if let Some(workspace) = workspace {
                server_config.workspace = workspace.clone();
            }
            if *dev {
                server_config.dev_mode = true;
            }
            server::start_server(server_config).await?;
        }
        Commands::Config => {
            let config = load_config(&cli)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
