//! Cluster node wiring
//!
//! Assembles one primary/secondary node: engine, replication listener,
//! controller, and the client-facing server, with an orderly shutdown
//! path (stop accepting, stop replicating, final snapshot).

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::unbounded;

use crate::config::Config;
use crate::engine::StateEngine;
use crate::error::Result;
use crate::network::{KvService, Server, ShutdownHandle};
use crate::repl::ReplListener;

use super::{ClusterConfig, ClusterController, Role};

/// A running cluster node
pub struct ClusterNode {
    engine: Arc<StateEngine>,
    controller: Arc<ClusterController>,
    listener: ReplListener,
    kv_addr: SocketAddr,
    shutdown: ShutdownHandle,
    server_thread: Option<JoinHandle<Result<()>>>,
    controller_threads: Vec<JoinHandle<()>>,
}

impl ClusterNode {
    /// Open the engine, start replication and the client server.
    pub fn start(cluster: ClusterConfig, store: Config) -> Result<Self> {
        let engine = Arc::new(StateEngine::open(store.clone(), cluster.node_id)?);

        let (inbox_tx, inbox_rx) = unbounded();
        let listener = ReplListener::start(&cluster.repl_addr, inbox_tx)?;

        let (controller, controller_threads) =
            ClusterController::start(cluster, Arc::clone(&engine), inbox_rx);

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

        tracing::info!(kv = %kv_addr, role = ?controller.role(), "cluster node started");

        Ok(ClusterNode {
            engine,
            controller,
            listener,
            kv_addr,
            shutdown,
            server_thread: Some(server_thread),
            controller_threads,
        })
    }

    /// Client-facing address (useful with an ephemeral port)
    pub fn kv_addr(&self) -> SocketAddr {
        self.kv_addr
    }

    /// Current role of this node
    pub fn role(&self) -> Role {
        self.controller.role()
    }

    /// Current election term
    pub fn term(&self) -> u64 {
        self.controller.term()
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
        for handle in self.controller_threads.drain(..) {
            let _ = handle.join();
        }

        self.engine.snapshot_now()?;
        Ok(())
    }
}
