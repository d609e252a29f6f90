//! Leaderless-mode integration tests
//!
//! Three in-process nodes, all accepting writes, converging under
//! last-writer-wins.

mod common;

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use common::{free_ports, wait_until, TestClient};
use meridiankv::leaderless::{LeaderlessConfig, LeaderlessNode};
use meridiankv::Config;

// =============================================================================
// Harness
// =============================================================================

struct MeshPorts {
    kv: Vec<u16>,
    repl: Vec<u16>,
}

fn mesh_ports() -> MeshPorts {
    let ports = free_ports(6);
    MeshPorts {
        kv: ports[0..3].to_vec(),
        repl: ports[3..6].to_vec(),
    }
}

fn start_node(temp: &TempDir, ports: &MeshPorts, node_id: u32) -> LeaderlessNode {
    let peer_addrs = (0..3u32)
        .filter(|id| *id != node_id)
        .map(|id| format!("127.0.0.1:{}", ports.repl[id as usize]))
        .collect();

    let config = LeaderlessConfig::new(
        node_id,
        format!("127.0.0.1:{}", ports.repl[node_id as usize]),
        peer_addrs,
    );
    let store = Config::builder()
        .data_dir(temp.path().join(format!("node{}", node_id)))
        .listen_addr(format!("127.0.0.1:{}", ports.kv[node_id as usize]))
        .build();
    LeaderlessNode::start(config, store).unwrap()
}

fn converged(nodes: &[LeaderlessNode], key: &str, expected: &serde_json::Value) -> bool {
    nodes.iter().all(|node| {
        let mut client = TestClient::connect(node.kv_addr());
        client.get(key) == *expected
    })
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_every_node_accepts_writes() {
    let _guard = common::serial_guard();
    let temp = TempDir::new().unwrap();
    let ports = mesh_ports();
    let nodes: Vec<LeaderlessNode> = (0..3).map(|i| start_node(&temp, &ports, i)).collect();

    // Acked immediately after local durability, no quorum needed.
    for (i, node) in nodes.iter().enumerate() {
        let mut client = TestClient::connect(node.kv_addr());
        assert_eq!(
            client.set(&format!("from{}", i), "here"),
            json!({"ok": true})
        );
    }

    // Every write gossips to every node.
    for i in 0..3 {
        let key = format!("from{}", i);
        let expected = json!({"ok": true, "value": "here"});
        assert!(
            wait_until(Duration::from_secs(5), || converged(&nodes, &key, &expected)),
            "{} never converged",
            key
        );
    }

    for node in nodes {
        node.shutdown().unwrap();
    }
}

#[test]
fn test_last_writer_wins_across_nodes() {
    let _guard = common::serial_guard();
    let temp = TempDir::new().unwrap();
    let ports = mesh_ports();
    let nodes: Vec<LeaderlessNode> = (0..3).map(|i| start_node(&temp, &ports, i)).collect();

    // Node 0 writes first, node 1 strictly later by wall clock.
    let mut a = TestClient::connect(nodes[0].kv_addr());
    assert_eq!(a.set("k", "A"), json!({"ok": true}));
    std::thread::sleep(Duration::from_millis(20));
    let mut b = TestClient::connect(nodes[1].kv_addr());
    assert_eq!(b.set("k", "B"), json!({"ok": true}));

    // Once gossip settles, everyone returns the later write, including
    // node 0 which wrote the loser.
    let expected = json!({"ok": true, "value": "B"});
    assert!(
        wait_until(Duration::from_secs(5), || converged(&nodes, "k", &expected)),
        "LWW never converged on the later write"
    );

    for node in nodes {
        node.shutdown().unwrap();
    }
}

#[test]
fn test_delete_propagates_as_tombstone() {
    let _guard = common::serial_guard();
    let temp = TempDir::new().unwrap();
    let ports = mesh_ports();
    let nodes: Vec<LeaderlessNode> = (0..3).map(|i| start_node(&temp, &ports, i)).collect();

    let mut a = TestClient::connect(nodes[0].kv_addr());
    assert_eq!(a.set("doomed", "soon"), json!({"ok": true}));

    let present = json!({"ok": true, "value": "soon"});
    assert!(wait_until(Duration::from_secs(5), || converged(
        &nodes, "doomed", &present
    )));

    // Delete on a different node than the writer.
    std::thread::sleep(Duration::from_millis(20));
    let mut b = TestClient::connect(nodes[1].kv_addr());
    assert_eq!(b.delete("doomed"), json!({"ok": true}));

    let absent = json!({"ok": true, "found": false});
    assert!(
        wait_until(Duration::from_secs(5), || converged(&nodes, "doomed", &absent)),
        "tombstone never converged"
    );

    for node in nodes {
        node.shutdown().unwrap();
    }
}

#[test]
fn test_bulkset_gossips_atomically() {
    let _guard = common::serial_guard();
    let temp = TempDir::new().unwrap();
    let ports = mesh_ports();
    let nodes: Vec<LeaderlessNode> = (0..3).map(|i| start_node(&temp, &ports, i)).collect();

    let mut client = TestClient::connect(nodes[2].kv_addr());
    assert_eq!(
        client.bulkset(&[("b1", "x"), ("b2", "y")]),
        json!({"ok": true})
    );

    for (key, value) in [("b1", "x"), ("b2", "y")] {
        let expected = json!({"ok": true, "value": value});
        assert!(wait_until(Duration::from_secs(5), || converged(
            &nodes, key, &expected
        )));
    }

    for node in nodes {
        node.shutdown().unwrap();
    }
}

#[test]
fn test_node_restart_recovers_gossiped_state() {
    let _guard = common::serial_guard();
    let temp = TempDir::new().unwrap();
    let ports = mesh_ports();
    let mut nodes: Vec<LeaderlessNode> = (0..3).map(|i| start_node(&temp, &ports, i)).collect();

    let mut client = TestClient::connect(nodes[0].kv_addr());
    assert_eq!(client.set("sticky", "value"), json!({"ok": true}));

    let expected = json!({"ok": true, "value": "value"});
    assert!(wait_until(Duration::from_secs(5), || converged(
        &nodes, "sticky", &expected
    )));

    // Restart node 2 on its data dir: the replicated entry was WAL'd
    // locally, so it survives without help from the peers.
    let node2 = nodes.remove(2);
    node2.shutdown().unwrap();
    let node2 = start_node(&temp, &ports, 2);

    let mut client = TestClient::connect(node2.kv_addr());
    assert_eq!(client.get("sticky"), expected);

    nodes.push(node2);
    for node in nodes {
        node.shutdown().unwrap();
    }
}
