//! MeridianKV leaderless node binary (last-writer-wins replication)

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use meridiankv::leaderless::{LeaderlessConfig, LeaderlessNode};
use meridiankv::Config;

/// MeridianKV leaderless node
#[derive(Parser, Debug)]
#[command(name = "meridian-leaderless")]
#[command(about = "Leaderless (last-writer-wins) key-value store node")]
#[command(version)]
struct Args {
    /// This node's id; breaks timestamp ties, so ids must be unique
    #[arg(long)]
    node_id: u32,

    /// Client port of this node
    #[arg(long)]
    kv_port: u16,

    /// Replication port of this node
    #[arg(long)]
    repl_port: u16,

    /// Replication ports of all peer nodes
    #[arg(long, value_delimiter = ',', required = true)]
    peer_repl_ports: Vec<u16>,

    /// Data directory
    #[arg(long)]
    data_dir: String,

    /// Enable full-text and similarity indexes
    #[arg(long)]
    enable_indexes: bool,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let store = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(format!("127.0.0.1:{}", args.kv_port))
        .enable_indexes(args.enable_indexes)
        .build();
    let config = LeaderlessConfig::new(
        args.node_id,
        format!("127.0.0.1:{}", args.repl_port),
        args.peer_repl_ports
            .iter()
            .map(|port| format!("127.0.0.1:{}", port))
            .collect(),
    );

    tracing::info!(
        "MeridianKV v{} leaderless node {} (kv {}, repl {})",
        meridiankv::VERSION,
        args.node_id,
        args.kv_port,
        args.repl_port
    );

    let node = match LeaderlessNode::start(config, store) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("failed to start leaderless node: {}", e);
            std::process::exit(1);
        }
    };

    wait_for_shutdown_signal();

    if let Err(e) = node.shutdown() {
        tracing::error!("shutdown error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("leaderless node stopped");
}

fn wait_for_shutdown_signal() {
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(());
    }) {
        tracing::warn!("failed to install signal handler: {}", e);
    }
    let _ = rx.recv();
    tracing::info!("shutdown signal received");
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
