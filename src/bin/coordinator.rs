use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use viewpool::config::Config;
use viewpool::coordinator::{self, Coordinator, CoordinatorEvent};
use viewpool::notify::{LogNotifier, Notifier};
use viewpool::resolve::ChannelResolver;
use viewpool::viewers::{HttpViewerFeed, ViewerMonitor};

#[derive(Parser)]
#[command(name = "viewpool-coordinator", about = "Viewer pool coordinator")]
struct Args {
    /// Configuration file path.
    #[arg(long, default_value = "config.toml")]
    config: String,
}

fn notifier() -> Arc<dyn Notifier> {
    #[cfg(feature = "telegram")]
    if let Some(config) = viewpool::notify::telegram::TelegramConfig::from_env() {
        return Arc::new(viewpool::notify::telegram::TelegramNotifier::new(config));
    }
    Arc::new(LogNotifier)
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
    info!("viewpool coordinator starting");

    let listener = match TcpListener::bind(&config.coordinator.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.coordinator.listen_addr, error = %e, "bind failed");
            std::process::exit(1);
        }
    };
    info!(addr = %config.coordinator.listen_addr, "listening for workers");

    let notifier = notifier();
    let state = Coordinator::new(
        config.coordinator.default_channel_id.clone(),
        config.pool.pool_limit,
        Arc::clone(&notifier),
    );
    let resolver = ChannelResolver::new(config.network.site_url.clone());
    let monitor = ViewerMonitor::new(
        Box::new(HttpViewerFeed::new(config.network.viewers_url.clone())),
        config.viewers.clone(),
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(coordinator::serve(listener, events_tx.clone()));
    tokio::spawn(read_commands(events_tx));

    tokio::select! {
        result = coordinator::run(
            state,
            resolver,
            monitor,
            notifier,
            config.stat_timeout(),
            events_rx,
        ) => {
            if let Err(e) = result {
                error!(error = %e, "Fatal error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("viewpool coordinator stopped");
}

/// Read operator commands off stdin, one per line.
async fn read_commands(events: mpsc::UnboundedSender<CoordinatorEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match coordinator::parse_command(line) {
            Some(command) => {
                let _ = events.send(CoordinatorEvent::Command(command));
            }
            None => warn!(%line, "unrecognized command"),
        }
    }
}
