//! MeridianKV cluster node binary (primary/secondary replication)

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use meridiankv::cluster::{ClusterConfig, ClusterNode, PeerInfo};
use meridiankv::Config;

/// MeridianKV cluster node
///
/// Peer lists are ordered by ascending peer node id: with three nodes,
/// node 1 passes the ports of nodes 0 and 2, in that order.
#[derive(Parser, Debug)]
#[command(name = "meridian-cluster")]
#[command(about = "Primary/secondary replicated key-value store node")]
#[command(version)]
struct Args {
    /// This node's id (node 0 bootstraps as primary)
    #[arg(long)]
    node_id: u32,

    /// Client port of this node
    #[arg(long)]
    kv_port: u16,

    /// Replication port of this node
    #[arg(long)]
    repl_port: u16,

    /// Replication ports of the other nodes, ascending node id
    #[arg(long, value_delimiter = ',', required = true)]
    secondary_repl_ports: Vec<u16>,

    /// Client ports of the other nodes, ascending node id
    #[arg(long, value_delimiter = ',', required = true)]
    other_kv_ports: Vec<u16>,

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

    if args.secondary_repl_ports.len() != args.other_kv_ports.len() {
        tracing::error!("--secondary-repl-ports and --other-kv-ports must pair up");
        std::process::exit(2);
    }

    let peers = peer_infos(
        args.node_id,
        &args.secondary_repl_ports,
        &args.other_kv_ports,
    );

    let store = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(format!("127.0.0.1:{}", args.kv_port))
        .enable_indexes(args.enable_indexes)
        .build();
    let cluster = ClusterConfig::new(
        args.node_id,
        args.kv_port,
        format!("127.0.0.1:{}", args.repl_port),
        peers,
    );

    tracing::info!(
        "MeridianKV v{} cluster node {} (kv {}, repl {})",
        meridiankv::VERSION,
        args.node_id,
        args.kv_port,
        args.repl_port
    );

    let node = match ClusterNode::start(cluster, store) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("failed to start cluster node: {}", e);
            std::process::exit(1);
        }
    };

    wait_for_shutdown_signal();

    if let Err(e) = node.shutdown() {
        tracing::error!("shutdown error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("cluster node stopped");
}

/// Assign ids to peers: every id except ours, ascending, paired with the
/// provided port lists in order.
fn peer_infos(own_id: u32, repl_ports: &[u16], kv_ports: &[u16]) -> Vec<PeerInfo> {
    (0..=repl_ports.len() as u32)
        .filter(|id| *id != own_id)
        .zip(repl_ports.iter().zip(kv_ports.iter()))
        .map(|(node_id, (repl_port, kv_port))| PeerInfo {
            node_id,
            repl_addr: format!("127.0.0.1:{}", repl_port),
            kv_port: *kv_port,
        })
        .collect()
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
