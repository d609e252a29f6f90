//! Leaderless Module
//!
//! Masterless replication: every node accepts reads and writes. A write
//! is acked after local durability, then fanned out best-effort to all
//! peers; conflicts resolve by last-writer-wins (timestamp, then origin
//! node id). Unreachable peers accumulate entries in a bounded queue
//! whose overflow drops the oldest entry.
//!
//! Correctness of "most recent wins" leans on loosely synchronized wall
//! clocks; skew larger than the inter-write interval can reorder
//! concurrent writes. That trade-off is accepted here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};

use crate::config::Config;
use crate::engine::{StateEngine, WritePath};
use crate::error::Result;
use crate::network::{KvService, Server, ShutdownHandle};
use crate::repl::{PeerMessage, PeerSet, ReplListener};
use crate::wal::Operation;

/// Configuration for one leaderless node
#[derive(Debug, Clone)]
pub struct LeaderlessConfig {
    pub node_id: u32,

    /// Replication listen address of this node
    pub repl_addr: String,

    /// Replication addresses of all peers
    pub peer_repl_addrs: Vec<String>,

    /// Per-peer outbound buffer capacity
    pub outbound_buffer: usize,
}

impl LeaderlessConfig {
    pub fn new(node_id: u32, repl_addr: String, peer_repl_addrs: Vec<String>) -> Self {
        LeaderlessConfig {
            node_id,
            repl_addr,
            peer_repl_addrs,
            outbound_buffer: 10_000,
        }
    }
}

/// Write path and receipt loop for leaderless replication
pub struct LeaderlessController {
    engine: Arc<StateEngine>,
    peers: PeerSet,
    stop: AtomicBool,
}

impl LeaderlessController {
    /// Build the controller and spawn the receipt thread.
    pub fn start(
        config: &LeaderlessConfig,
        engine: Arc<StateEngine>,
        inbox: Receiver<PeerMessage>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        // Peer ids are not meaningful addresses here; index them.
        let peers = PeerSet::start(
            config
                .peer_repl_addrs
                .iter()
                .enumerate()
                .map(|(i, addr)| (i as u32, addr.clone()))
                .collect(),
            config.outbound_buffer,
        );

        let controller = Arc::new(LeaderlessController {
            engine,
            peers,
            stop: AtomicBool::new(false),
        });

        let receipt_controller = Arc::clone(&controller);
        let handle = thread::Builder::new()
            .name("meridian-lww-inbox".to_string())
            .spawn(move || receipt_controller.inbox_loop(inbox))
            .expect("failed to spawn leaderless inbox thread");

        (controller, handle)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.peers.stop();
    }

    fn inbox_loop(self: Arc<Self>, inbox: Receiver<PeerMessage>) {
        while !self.stop.load(Ordering::Relaxed) {
            match inbox.recv_timeout(Duration::from_millis(50)) {
                Ok(PeerMessage::AppendEntry { entry, .. }) => {
                    // Apply under LWW; no re-fan-out (the origin already
                    // reached every peer it could).
                    if let Err(e) = self.engine.apply_replicated(entry) {
                        tracing::warn!("failed to apply replicated entry: {}", e);
                    }
                }
                Ok(other) => {
                    tracing::debug!(?other, "ignoring non-entry message in leaderless mode");
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

impl WritePath for LeaderlessController {
    /// Leaderless write path: durable and applied locally, acked, then
    /// shipped best-effort.
    fn submit(&self, op: Operation, simulate_fail: bool) -> Result<()> {
        let entry = self.engine.submit_local(op, simulate_fail)?;
        self.peers
            .broadcast(&PeerMessage::AppendEntry { term: 0, entry });
        Ok(())
    }
}

/// A running leaderless node
pub struct LeaderlessNode {
    engine: Arc<StateEngine>,
    controller: Arc<LeaderlessController>,
    listener: ReplListener,
    kv_addr: SocketAddr,
    shutdown: ShutdownHandle,
    server_thread: Option<JoinHandle<Result<()>>>,
    inbox_thread: Option<JoinHandle<()>>,
}

impl LeaderlessNode {
    /// Open the engine, start replication and the client server.
    pub fn start(config: LeaderlessConfig, store: Config) -> Result<Self> {
        let engine = Arc::new(StateEngine::open(store.clone(), config.node_id)?);

        let (inbox_tx, inbox_rx) = unbounded();
        let listener = ReplListener::start(&config.repl_addr, inbox_tx)?;

        let (controller, inbox_thread) =
            LeaderlessController::start(&config, Arc::clone(&engine), inbox_rx);

        let service = KvService::with_optional_indexes(
            Arc::clone(&engine),
            controller.clone(),
            store.enable_indexes,
        );

        let mut server = Server::bind(store, Arc::new(service))?;
        let kv_addr = server.local_addr()?;
        let shutdown = server.shutdown_handle();
        let server_thread = thread::Builder::new()
            .name("meridian-kv-server".to_string())
            .spawn(move || server.run())
            .expect("failed to spawn server thread");

        tracing::info!(kv = %kv_addr, "leaderless node started");

        Ok(LeaderlessNode {
            engine,
            controller,
            listener,
            kv_addr,
            shutdown,
            server_thread: Some(server_thread),
            inbox_thread: Some(inbox_thread),
        })
    }

    /// Client-facing address (useful with an ephemeral port)
    pub fn kv_addr(&self) -> SocketAddr {
        self.kv_addr
    }

    pub fn engine(&self) -> &Arc<StateEngine> {
        &self.engine
    }

    /// Graceful shutdown: stop accepting, stop replication, join
    /// everything, then write a final snapshot.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown.shutdown();
        self.controller.stop();
        self.listener.stop();

        if let Some(handle) = self.server_thread.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => tracing::error!("server thread panicked"),
            }
        }
        if let Some(handle) = self.inbox_thread.take() {
            let _ = handle.join();
        }

        self.engine.snapshot_now()?;
        Ok(())
    }
}
