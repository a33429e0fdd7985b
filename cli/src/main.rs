// relaypool — dVPN pool control plane daemon
//
// Thin binary over relaypool-core: parses the command line, wires the
// storage backend and access gate, and serves the HTTP surface.

mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaypool_core::{MemoryStorage, PoolConfig, PoolService, SledStorage, StorageBackend};

#[derive(Parser)]
#[command(name = "relaypool")]
#[command(about = "Relaypool — dVPN provider pool control plane", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the pool HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Path for the sled store; in-memory when omitted
        #[arg(short, long)]
        store: Option<String>,
    },
    /// Prune stale providers from the store and exit
    Prune {
        /// Path for the sled store
        #[arg(short, long)]
        store: String,
    },
}

fn open_store(path: Option<&str>) -> Result<Arc<dyn StorageBackend>> {
    match path {
        Some(path) => {
            let store = SledStorage::open(path)
                .with_context(|| format!("failed to open store at {path}"))?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("no --store path given; state will not survive a restart");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PoolConfig::from_env();

    match cli.command {
        Commands::Serve { port, store } => {
            let store = open_store(store.as_deref())?;
            let service = Arc::new(PoolService::with_allowlist_gate(&config, store));
            tracing::info!(port, "relaypool serving");
            server::run(service, port).await;
            Ok(())
        }
        Commands::Prune { store } => {
            let store = open_store(Some(&store))?;
            let service = PoolService::with_allowlist_gate(&config, store);
            let removed = service.prune_providers();
            println!("pruned {removed} provider(s)");
            Ok(())
        }
    }
}
