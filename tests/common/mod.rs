//! Shared helpers for integration tests
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

/// Minimal line-protocol client for tests
pub struct TestClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TestClient {
    /// Connect, retrying briefly so tests can race server startup.
    pub fn connect(addr: SocketAddr) -> TestClient {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    let writer = stream.try_clone().unwrap();
                    return TestClient {
                        reader: BufReader::new(stream),
                        writer,
                    };
                }
                Err(e) => {
                    if Instant::now() >= deadline {
                        panic!("connect to {} failed: {}", addr, e);
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// Send raw bytes (for malformed-input tests)
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
        self.writer.flush().unwrap();
    }

    /// Read one response line as JSON
    pub fn read_response(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap();
        assert!(n > 0, "connection closed while waiting for a response");
        serde_json::from_str(line.trim_end()).unwrap()
    }

    /// Send one request object and read the response
    pub fn request(&mut self, request: Value) -> Value {
        let mut line = request.to_string();
        line.push('\n');
        self.send_raw(line.as_bytes());
        self.read_response()
    }

    pub fn set(&mut self, key: &str, value: &str) -> Value {
        self.request(json!({"op": "set", "key": key, "value": value}))
    }

    pub fn get(&mut self, key: &str) -> Value {
        self.request(json!({"op": "get", "key": key}))
    }

    pub fn delete(&mut self, key: &str) -> Value {
        self.request(json!({"op": "delete", "key": key}))
    }

    pub fn bulkset(&mut self, pairs: &[(&str, &str)]) -> Value {
        let pairs: Vec<Value> = pairs.iter().map(|(k, v)| json!([k, v])).collect();
        self.request(json!({"op": "bulkset", "pairs": pairs}))
    }

    /// True if the server has closed this connection (EOF within 2s).
    pub fn expect_closed(&mut self) -> bool {
        use std::io::Read;
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut probe = [0u8; 64];
        matches!(self.reader.read(&mut probe), Ok(0))
    }
}

/// Serialize multi-node tests within one binary: they pre-reserve ports
/// and spawn many threads, so overlapping runs are flaky.
pub fn serial_guard() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reserve `n` distinct free ports. Racy by nature, but good enough for
/// tests that must announce peer addresses before binding them.
pub fn free_ports(n: usize) -> Vec<u16> {
    let listeners: Vec<TcpListener> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

/// Poll until `check` passes or the timeout elapses.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
