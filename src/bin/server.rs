//! MeridianKV single-node server binary

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use meridiankv::network::{KvService, Server};
use meridiankv::{Config, StateEngine};

/// MeridianKV server (single node)
#[derive(Parser, Debug)]
#[command(name = "meridian-server")]
#[command(about = "Durable key-value store over TCP")]
#[command(version)]
struct Args {
    /// Client port
    #[arg(short, long, default_value = "7401")]
    port: u16,

    /// Data directory
    #[arg(short, long, default_value = "./meridian_data")]
    data_dir: String,

    /// Enable full-text and similarity indexes
    #[arg(long)]
    enable_indexes: bool,

    /// Probability that a debug-armed snapshot write is skipped
    #[arg(long, default_value = "0.5")]
    debug_fail_chance: f64,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    tracing::info!("MeridianKV v{}", meridiankv::VERSION);
    tracing::info!("data directory: {}", args.data_dir);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(format!("127.0.0.1:{}", args.port))
        .enable_indexes(args.enable_indexes)
        .debug_fail_chance(args.debug_fail_chance)
        .build();

    let engine = match StateEngine::open(config.clone(), 0) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let service = KvService::with_optional_indexes(
        Arc::clone(&engine),
        engine.clone(),
        config.enable_indexes,
    );

    let mut server = match Server::bind(config, Arc::new(service)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to bind server: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        shutdown.shutdown();
    }) {
        tracing::warn!("failed to install signal handler: {}", e);
    }

    if let Err(e) = server.run() {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }

    // Graceful exit: the accept loop has drained; seal state with a
    // final snapshot.
    if let Err(e) = engine.snapshot_now() {
        tracing::error!("final snapshot failed: {}", e);
        std::process::exit(1);
    }
    tracing::info!("server stopped");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meridiankv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
