use clap::Parser;
use puzzlecoop_server::{PuzzleServer, ServerConfig};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(
        snap_threshold = config.snap_threshold,
        lock_timeout_secs = config.lock_timeout_secs,
        heartbeat_secs = config.heartbeat_secs,
        "starting puzzlecoop server"
    );
    PuzzleServer::new(&config).run(listener).await?;
    Ok(())
}
