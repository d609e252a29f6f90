//! Cluster Module
//!
//! Primary/secondary replication with a bounded leader election.
//!
//! One node is Primary and accepts writes; it replicates every entry to
//! the Secondaries and acks the client only after a strict majority of
//! the cluster (itself included) holds the entry durably. Secondaries
//! that stop hearing heartbeats hold an election; terms keep at most one
//! Primary alive per epoch.

mod controller;
mod node;

pub use controller::{ClusterController, Role};
pub use node::ClusterNode;

use std::time::Duration;

/// Identity and address of one peer, as configured
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub node_id: u32,
    /// Replication address, e.g. `127.0.0.1:7502`
    pub repl_addr: String,
    /// Client-facing port, used for the `not_primary` hint
    pub kv_port: u16,
}

/// Configuration for one cluster node
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub node_id: u32,

    /// Client-facing port of this node
    pub kv_port: u16,

    /// Replication listen address of this node
    pub repl_addr: String,

    /// All other cluster members, ascending node id
    pub peers: Vec<PeerInfo>,

    /// Primary heartbeat cadence
    pub heartbeat_interval: Duration,

    /// Election timeout range; each deadline is drawn uniformly from it
    pub election_timeout: (Duration, Duration),

    /// How long a write waits for a majority before `unavailable`
    pub majority_timeout: Duration,

    /// Per-peer outbound buffer capacity
    pub outbound_buffer: usize,
}

impl ClusterConfig {
    pub fn new(node_id: u32, kv_port: u16, repl_addr: String, peers: Vec<PeerInfo>) -> Self {
        ClusterConfig {
            node_id,
            kv_port,
            repl_addr,
            peers,
            heartbeat_interval: Duration::from_millis(150),
            election_timeout: (Duration::from_millis(800), Duration::from_millis(1600)),
            majority_timeout: Duration::from_millis(500),
            outbound_buffer: 10_000,
        }
    }

    /// Strict majority of the whole cluster (this node included)
    pub fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }
}
