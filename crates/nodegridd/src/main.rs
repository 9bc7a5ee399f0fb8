//! nodegridd — the nodegrid daemon.
//!
//! Single binary that assembles the control plane:
//! - Durable store (redb)
//! - In-memory liveness store
//! - Node registry, cluster query, profile catalog, allocator
//! - Background sweeper (stale nodes, metric retention, expired liveness)
//! - REST API + Prometheus endpoint
//!
//! # Usage
//!
//! ```text
//! nodegridd serve --config /etc/nodegrid/nodegrid.toml --port 15002
//! nodegridd init --data-dir /var/lib/nodegrid
//! nodegridd default-config > nodegrid.toml
//! ```

mod serve;
mod sweeper;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nodegrid_core::NodegridConfig;

#[derive(Parser)]
#[command(name = "nodegridd", about = "nodegrid node discovery and allocation daemon")]
struct Cli {
    /// Path to nodegrid.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane: API server plus background sweeper.
    Serve {
        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the durable store (overrides `server.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Create the store and seed the default profiles, then exit.
    Init {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,nodegridd=debug,nodegrid=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = NodegridConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port, data_dir } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            serve::run(config).await
        }
        Command::Init { data_dir } => {
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            serve::init(&config)
        }
        Command::DefaultConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
