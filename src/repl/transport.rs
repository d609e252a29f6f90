//! Peer transport
//!
//! Outbound senders with reconnect/backoff and a bounded queue, plus the
//! inbound listener that feeds received messages to the controller.

use std::collections::{HashMap, VecDeque};
use std::io::BufWriter;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::error::{MeridianError, Result};
use crate::protocol::write_line;

use super::PeerMessage;

/// Initial reconnect backoff
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Reconnect backoff cap
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// How long the sender thread waits for new messages before rechecking
/// the stop flag
const SEND_POLL: Duration = Duration::from_millis(100);

// =============================================================================
// Outbound: PeerSender
// =============================================================================

struct SenderShared {
    queue: Mutex<VecDeque<PeerMessage>>,
    available: Condvar,
    stop: AtomicBool,
    dropped: AtomicU64,
    capacity: usize,
}

/// Persistent outbound connection to one peer.
///
/// Messages are queued and shipped by a background thread; the queue is
/// bounded and drops its oldest message on overflow, which is logged as
/// replication lag. Reconnects use exponential backoff from 100 ms up to
/// 2 s.
pub struct PeerSender {
    addr: String,
    shared: Arc<SenderShared>,
    handle: Option<JoinHandle<()>>,
}

impl PeerSender {
    pub fn start(addr: String, capacity: usize) -> Self {
        let shared = Arc::new(SenderShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stop: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            capacity,
        });

        let thread_shared = Arc::clone(&shared);
        let thread_addr = addr.clone();
        let handle = thread::Builder::new()
            .name(format!("meridian-peer-{}", addr))
            .spawn(move || sender_loop(thread_addr, thread_shared))
            .expect("failed to spawn peer sender thread");

        PeerSender {
            addr,
            shared,
            handle: Some(handle),
        }
    }

    /// Queue a message for delivery. Never blocks on the network; on a
    /// full queue the oldest message is dropped and counted.
    pub fn send(&self, message: PeerMessage) {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            queue.pop_front();
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                peer = %self.addr,
                dropped,
                "replication_lag_dropped: outbound buffer full"
            );
        }
        queue.push_back(message);
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Total messages dropped to overflow since start
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.available.notify_all();
    }
}

impl Drop for PeerSender {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sender_loop(addr: String, shared: Arc<SenderShared>) {
    let mut connection: Option<BufWriter<TcpStream>> = None;
    let mut backoff = BACKOFF_INITIAL;

    while !shared.stop.load(Ordering::Relaxed) {
        // Wait for something to send.
        let message = {
            let mut queue = shared.queue.lock();
            if queue.is_empty() {
                shared.available.wait_for(&mut queue, SEND_POLL);
            }
            queue.pop_front()
        };
        let message = match message {
            Some(m) => m,
            None => continue,
        };

        loop {
            if shared.stop.load(Ordering::Relaxed) {
                return;
            }

            if connection.is_none() {
                match TcpStream::connect(&addr) {
                    Ok(stream) => {
                        tracing::debug!(peer = %addr, "peer connection established");
                        connection = Some(BufWriter::new(stream));
                        backoff = BACKOFF_INITIAL;
                    }
                    Err(e) => {
                        tracing::debug!(peer = %addr, "peer connect failed: {}", e);
                        thread::sleep(backoff);
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                        continue;
                    }
                }
            }

            let writer = connection.as_mut().expect("connection just established");
            match write_line(writer, &message) {
                Ok(()) => break,
                Err(e) => {
                    tracing::debug!(peer = %addr, "peer send failed: {}", e);
                    connection = None;
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    }
}

// =============================================================================
// Outbound: PeerSet
// =============================================================================

/// The outbound senders for all peers of a node, keyed by peer node id
pub struct PeerSet {
    peers: HashMap<u32, PeerSender>,
}

impl PeerSet {
    /// Start a sender per peer. `peers` maps node id to repl address.
    pub fn start(peers: Vec<(u32, String)>, capacity: usize) -> Self {
        let peers = peers
            .into_iter()
            .map(|(id, addr)| (id, PeerSender::start(addr, capacity)))
            .collect();
        PeerSet { peers }
    }

    /// Queue a message to every peer
    pub fn broadcast(&self, message: &PeerMessage) {
        for sender in self.peers.values() {
            sender.send(message.clone());
        }
    }

    /// Queue a message to one peer; unknown ids are ignored
    pub fn send_to(&self, node_id: u32, message: PeerMessage) {
        if let Some(sender) = self.peers.get(&node_id) {
            sender.send(message);
        }
    }

    pub fn peer_ids(&self) -> Vec<u32> {
        self.peers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn stop(&self) {
        for sender in self.peers.values() {
            sender.stop();
        }
    }
}

// =============================================================================
// Inbound: ReplListener
// =============================================================================

/// Accepts inbound peer connections and forwards parsed messages to the
/// controller's inbox channel.
pub struct ReplListener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: std::net::SocketAddr,
}

impl ReplListener {
    pub fn start(bind_addr: &str, inbox: Sender<PeerMessage>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).map_err(|e| {
            MeridianError::Network(format!("failed to bind repl {}: {}", bind_addr, e))
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("meridian-repl-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, inbox, accept_stop))
            .map_err(|e| MeridianError::Network(format!("failed to spawn repl listener: {}", e)))?;

        Ok(ReplListener {
            stop,
            handle: Some(handle),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for ReplListener {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, inbox: Sender<PeerMessage>, stop: Arc<AtomicBool>) {
    let mut readers: Vec<JoinHandle<()>> = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                tracing::debug!("inbound peer connection from {}", addr);
                let inbox = inbox.clone();
                let stop = Arc::clone(&stop);
                match thread::Builder::new()
                    .name("meridian-repl-reader".to_string())
                    .spawn(move || reader_loop(stream, inbox, stop))
                {
                    Ok(handle) => readers.push(handle),
                    Err(e) => tracing::error!("failed to spawn repl reader: {}", e),
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                if !stop.load(Ordering::Relaxed) {
                    tracing::error!("repl accept error: {}", e);
                }
            }
        }
    }

    for handle in readers {
        let _ = handle.join();
    }
}

fn reader_loop(mut stream: TcpStream, inbox: Sender<PeerMessage>, stop: Arc<AtomicBool>) {
    use std::io::Read;

    // Periodic read timeouts let the loop observe the stop flag. The
    // buffer persists across timeouts so a line split over them is not
    // lost.
    if stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .is_err()
    {
        return;
    }

    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    while !stop.load(Ordering::Relaxed) {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => return,
        }

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<PeerMessage>(line) {
                Ok(message) => {
                    if inbox.send(message).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("undecodable peer message dropped: {}", e);
                }
            }
        }

        if buffer.len() > crate::protocol::MAX_LINE_BYTES {
            tracing::warn!("oversized peer message; dropping connection");
            return;
        }
    }
}
