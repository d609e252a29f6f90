//! End-to-end tests for the single-node TCP server

mod common;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde_json::json;
use tempfile::TempDir;

use common::TestClient;
use meridiankv::network::{KvService, Server, ShutdownHandle};
use meridiankv::{Config, Result, StateEngine};

// =============================================================================
// Harness
// =============================================================================

struct TestNode {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    server_thread: Option<JoinHandle<Result<()>>>,
    engine: Arc<StateEngine>,
}

impl TestNode {
    fn start(data_dir: &Path, enable_indexes: bool) -> TestNode {
        let config = Config::builder()
            .data_dir(data_dir)
            .listen_addr("127.0.0.1:0")
            .enable_indexes(enable_indexes)
            .debug_fail_chance(1.0)
            .build();

        let engine = Arc::new(StateEngine::open(config.clone(), 0).unwrap());
        let service =
            KvService::with_optional_indexes(Arc::clone(&engine), engine.clone(), enable_indexes);

        let mut server = Server::bind(config, Arc::new(service)).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let server_thread = std::thread::spawn(move || server.run());

        TestNode {
            addr,
            shutdown,
            server_thread: Some(server_thread),
            engine,
        }
    }

    fn client(&self) -> TestClient {
        TestClient::connect(self.addr)
    }

    fn stop(mut self) {
        self.shutdown.shutdown();
        if let Some(handle) = self.server_thread.take() {
            handle.join().unwrap().unwrap();
        }
        self.engine.snapshot_now().unwrap();
    }
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_set_get_delete_roundtrip() {
    let temp = TempDir::new().unwrap();
    let node = TestNode::start(temp.path(), false);
    let mut client = node.client();

    assert_eq!(client.set("hello", "world"), json!({"ok": true}));
    assert_eq!(
        client.get("hello"),
        json!({"ok": true, "value": "world"})
    );

    assert_eq!(client.delete("hello"), json!({"ok": true}));
    assert_eq!(client.get("hello"), json!({"ok": true, "found": false}));

    node.stop();
}

#[test]
fn test_bulkset_visible_as_one() {
    let temp = TempDir::new().unwrap();
    let node = TestNode::start(temp.path(), false);
    let mut client = node.client();

    let response = client.bulkset(&[("a", "1"), ("b", "2"), ("c", "3")]);
    assert_eq!(response, json!({"ok": true}));

    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        assert_eq!(client.get(key), json!({"ok": true, "value": value}));
    }

    // An empty pair list is a no-op success.
    assert_eq!(
        client.request(json!({"op": "bulkset", "pairs": []})),
        json!({"ok": true})
    );

    node.stop();
}

#[test]
fn test_pipelined_requests_answered_in_order() {
    let temp = TempDir::new().unwrap();
    let node = TestNode::start(temp.path(), false);
    let mut client = node.client();

    client.send_raw(
        b"{\"op\":\"set\",\"key\":\"p\",\"value\":\"1\"}\n\
          {\"op\":\"get\",\"key\":\"p\"}\n\
          {\"op\":\"get\",\"key\":\"absent\"}\n",
    );

    assert_eq!(client.read_response(), json!({"ok": true}));
    assert_eq!(client.read_response(), json!({"ok": true, "value": "1"}));
    assert_eq!(client.read_response(), json!({"ok": true, "found": false}));

    node.stop();
}

// =============================================================================
// Protocol Errors
// =============================================================================

#[test]
fn test_empty_key_rejected() {
    let temp = TempDir::new().unwrap();
    let node = TestNode::start(temp.path(), false);
    let mut client = node.client();

    let response = client.request(json!({"op": "set", "key": "", "value": "v"}));
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"], json!("protocol"));

    let response = client.request(json!({"op": "get", "key": ""}));
    assert_eq!(response["error"], json!("protocol"));

    // The connection survives a well-formed but invalid request.
    assert_eq!(client.set("k", "v"), json!({"ok": true}));

    node.stop();
}

#[test]
fn test_malformed_line_errors_and_closes() {
    let temp = TempDir::new().unwrap();
    let node = TestNode::start(temp.path(), false);
    let mut client = node.client();

    client.send_raw(b"this is not json\n");
    let response = client.read_response();
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"], json!("protocol"));

    // The server closed the connection after the malformed line.
    assert!(client.expect_closed());

    node.stop();
}

// =============================================================================
// Search Surface
// =============================================================================

#[test]
fn test_search_disabled_without_indexes() {
    let temp = TempDir::new().unwrap();
    let node = TestNode::start(temp.path(), false);
    let mut client = node.client();

    let response = client.request(json!({"op": "search", "query": "anything"}));
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"], json!("indexes_disabled"));

    let response = client.request(json!({"op": "search_similar", "query": "anything"}));
    assert_eq!(response["error"], json!("indexes_disabled"));

    node.stop();
}

#[test]
fn test_search_with_indexes() {
    let temp = TempDir::new().unwrap();
    let node = TestNode::start(temp.path(), true);
    let mut client = node.client();

    client.set("doc1", "the quick brown fox");
    client.set("doc2", "the slow brown snail");
    client.set("doc3", "completely unrelated text");

    let response = client.request(json!({"op": "search", "query": "brown"}));
    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["keys"], json!(["doc1", "doc2"]));

    let response = client.request(json!({"op": "search", "query": "quick brown"}));
    assert_eq!(response["keys"], json!(["doc1"]));

    let response =
        client.request(json!({"op": "search_similar", "query": "quick brown fox", "top_k": 1}));
    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["matches"][0][0], json!("doc1"));

    // Deletion falls out of the indexes.
    client.delete("doc1");
    let response = client.request(json!({"op": "search", "query": "quick"}));
    assert_eq!(response["keys"], json!([]));

    node.stop();
}

#[test]
fn test_indexes_rebuilt_after_restart() {
    let temp = TempDir::new().unwrap();

    {
        let node = TestNode::start(temp.path(), true);
        let mut client = node.client();
        client.set("doc", "searchable words");
        node.stop();
    }

    let node = TestNode::start(temp.path(), true);
    let mut client = node.client();
    let response = client.request(json!({"op": "search", "query": "searchable"}));
    assert_eq!(response["keys"], json!(["doc"]));
    node.stop();
}

// =============================================================================
// Durability Through the Server
// =============================================================================

#[test]
fn test_poisoned_engine_stops_the_server() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::builder()
        .data_dir(temp.path())
        .listen_addr("127.0.0.1:0")
        .build();
    // Every WAL append fails with ENOSPC (/dev/full), standing in for a
    // dying disk; three in a row must poison the engine.
    config.wal_file = std::path::PathBuf::from("/dev/full");

    let engine = Arc::new(StateEngine::open(config.clone(), 0).unwrap());
    let service = KvService::with_optional_indexes(Arc::clone(&engine), engine.clone(), false);

    let mut server = Server::bind(config, Arc::new(service)).unwrap();
    let addr = server.local_addr().unwrap();
    let server_thread = std::thread::spawn(move || server.run());

    let mut client = TestClient::connect(addr);
    for _ in 0..3 {
        let response = client.set("k", "v");
        assert_eq!(response["ok"], json!(false));
        assert_eq!(response["error"], json!("io"));
    }
    assert!(!engine.healthy());

    // The accept loop notices the poisoned engine and bails out with an
    // error so the process can exit nonzero.
    let outcome = server_thread.join().unwrap();
    assert!(outcome.is_err(), "run() must stop once durability is lost");
}

#[test]
fn test_restart_preserves_writes() {
    let temp = TempDir::new().unwrap();

    {
        let node = TestNode::start(temp.path(), false);
        let mut client = node.client();
        client.set("hello", "world");
        client.request(
            json!({"op": "set", "key": "debug", "value": "survives", "debug_simulate_fail": true}),
        );
        node.stop();
    }

    let node = TestNode::start(temp.path(), false);
    let mut client = node.client();
    assert_eq!(client.get("hello"), json!({"ok": true, "value": "world"}));
    assert_eq!(
        client.get("debug"),
        json!({"ok": true, "value": "survives"})
    );
    node.stop();
}
