//! LiveCast CLI
//!
//! Replays a recorded contest to live viewers over WebSocket.

use anyhow::Context;
use clap::Parser;
use livecast_core::{BroadcastConfig, Broadcaster, DirTraceStore, TraceStore};
use livecast_env::TokioContext;
use livecast_server::serve;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Live broadcasts of recorded contests
#[derive(Parser, Debug)]
#[command(name = "livecast")]
#[command(about = "Replay a recorded contest to live viewers", long_about = None)]
struct Args {
    /// Replay directory (containing static.json)
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Step to start the broadcast from
    #[arg(long, default_value = "0")]
    step: usize,

    /// Seconds to wait after the first viewer connects
    #[arg(long, default_value = "10")]
    delay: f64,

    /// Seconds per step
    #[arg(long, default_value = "0.5")]
    speed: f64,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Steps per batch file in the replay directory
    #[arg(long, default_value = "5")]
    batch_size: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (RUST_LOG overrides --verbose)
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!("LiveCast v{}", env!("CARGO_PKG_VERSION"));

    let trace = DirTraceStore::new(&args.path)
        .with_batch_size(args.batch_size)
        .load()
        .with_context(|| format!("Failed to load replay from {}", args.path.display()))?;
    info!("Loaded {} steps from {}", trace.total_steps(), args.path.display());

    let config = BroadcastConfig::from_secs(args.step, args.delay, args.speed)?;
    let broadcaster = Arc::new(Broadcaster::new(trace, config)?);
    broadcaster.spawn(TokioContext::shared());

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, broadcaster).await
}
