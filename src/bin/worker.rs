use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use viewpool::config::Config;
use viewpool::pool::PoolManager;
use viewpool::session::WsConnector;
use viewpool::token::TokenAcquirer;
use viewpool::worker::{CoordinatorLink, Worker, WorkerConfig};

#[derive(Parser)]
#[command(name = "viewpool-worker", about = "Viewer pool worker shard")]
struct Args {
    /// Configuration file path.
    #[arg(long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = match Config::load_or_default(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    config.init_logging();
    info!("viewpool worker starting");

    let tokens = Arc::new(TokenAcquirer::new(config.network.token_url.clone()));
    let connector = Arc::new(WsConnector::new(config.network.connect_url.clone()));

    // The pool starts at the full configured limit; the coordinator's
    // first settings push overwrites it with this worker's share.
    let (pool, events) = PoolManager::new(
        config.coordinator.default_channel_id.clone(),
        config.pool.pool_limit,
        tokens,
        connector,
    );
    let worker = Worker::new(WorkerConfig::from(&config.pool), pool);
    let link = CoordinatorLink::new(config.coordinator.url.clone());

    tokio::select! {
        result = worker.run(link, events) => {
            if let Err(e) = result {
                error!(error = %e, "Fatal error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("viewpool worker stopped");
}
