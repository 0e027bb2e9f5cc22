//! tickstore Server Binary
//!
//! Runs an engine as a primary (optionally serving replicas) or as a
//! replica of another instance.

use std::time::Duration;

use clap::Parser;
use tickstore::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// tickstore Server
#[derive(Parser, Debug)]
#[command(name = "tickstore-server")]
#[command(about = "Time-series bucket store with WAL and replication")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tickstore_data")]
    root_dir: String,

    /// Instance id written into WAL files (0 derives one from the clock)
    #[arg(long, default_value = "0")]
    instance_id: i64,

    /// Serve replicas on this address (primary only)
    #[arg(short, long)]
    listen: Option<String>,

    /// Run as a replica of the primary at this address
    #[arg(long, conflicts_with = "listen")]
    replica_of: Option<String>,

    /// WAL commit interval in milliseconds
    #[arg(long, default_value = "500")]
    wal_sync_ms: u64,

    /// Checkpoint interval in seconds
    #[arg(long, default_value = "5")]
    refresh_secs: u64,

    /// Rotate the WAL every N checkpoints (0 disables)
    #[arg(long, default_value = "10")]
    rotate_every: u32,

    /// Reconnect delay in milliseconds before backoff
    #[arg(long, default_value = "1000")]
    retry_ms: u64,

    /// Backoff coefficient applied per reconnect attempt
    #[arg(long, default_value = "2")]
    retry_coeff: u32,

    /// Stop reconnecting after this many attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Skip the WAL (no durability, no replication)
    #[arg(long)]
    wal_bypass: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tickstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("tickstore Server v{}", tickstore::VERSION);
    tracing::info!("Data directory: {}", args.root_dir);

    // Build config from args
    let mut builder = Config::builder()
        .root_dir(&args.root_dir)
        .instance_id(args.instance_id)
        .wal_sync_interval(Duration::from_millis(args.wal_sync_ms))
        .primary_refresh_interval(Duration::from_secs(args.refresh_secs))
        .rotate_every_checkpoints(args.rotate_every)
        .retry_backoff(Duration::from_millis(args.retry_ms), args.retry_coeff)
        .max_attempts(args.max_attempts)
        .wal_bypass(args.wal_bypass);
    if let Some(addr) = &args.listen {
        tracing::info!("Replication address: {}", addr);
        builder = builder.replication_listen(addr);
    }
    if let Some(primary) = &args.replica_of {
        tracing::info!("Replicating from: {}", primary);
        builder = builder.replica_of(primary);
    }
    let config = builder.build();

    // Open engine
    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        instance_id = engine.instance_id(),
        role = ?engine.role(),
        "Engine running; stop the process to exit"
    );

    // Everything runs on engine threads. A killed process leaves its WAL
    // for the next start to replay.
    loop {
        std::thread::park();
    }
}
