//! TCP Server
//!
//! Listens for client connections and serves each one on its own thread.
//! The acceptor polls a nonblocking listener so it can watch the
//! shutdown flag and the handler's health between accepts; it keeps a
//! roster of live serving threads, reaps finished ones as it goes, and
//! joins the rest on the way out so shutdown drains in-flight requests.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::{MeridianError, Result};
use crate::protocol::{write_line, Response};

use super::{Connection, RequestHandler};

/// Accept poll granularity; also bounds shutdown latency
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Handle for requesting a server shutdown from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// TCP server for the client protocol
pub struct Server {
    config: Config,
    handler: Arc<dyn RequestHandler>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    /// Live-connection gauge, decremented by each thread's exit guard
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind the listen address and prepare the server.
    pub fn bind(config: Config, handler: Arc<dyn RequestHandler>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).map_err(|e| {
            MeridianError::Network(format!("failed to bind {}: {}", config.listen_addr, e))
        })?;
        // Nonblocking so the accept loop can poll flags between clients.
        listener.set_nonblocking(true)?;

        Ok(Server {
            config,
            handler,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Accept and serve clients until shutdown is requested or the
    /// handler reports it can no longer honor durability (blocking).
    ///
    /// Returns `Err` in the unhealthy case: it is the caller's signal to
    /// exit nonzero rather than restart the loop.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!("accepting clients on {}", self.config.listen_addr);
        let mut roster: Vec<JoinHandle<()>> = Vec::new();

        let outcome = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break Ok(());
            }
            if !self.handler.healthy() {
                tracing::error!("durability lost; refusing further clients");
                break Err(MeridianError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "request handler reported unhealthy",
                )));
            }

            let (stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    continue;
                }
            };

            roster.retain(|serving| !serving.is_finished());
            if roster.len() >= self.config.max_connections {
                tracing::warn!(
                    peer = %addr,
                    limit = self.config.max_connections,
                    "turning away client; at capacity"
                );
                turn_away(stream);
                continue;
            }

            match self.serve_on_thread(stream, addr) {
                Ok(serving) => roster.push(serving),
                Err(e) => tracing::error!("could not serve {}: {}", addr, e),
            }
        };

        // Raise the flag for in-flight connections too, then drain them.
        self.shutdown.store(true, Ordering::Relaxed);
        if !roster.is_empty() {
            tracing::info!(in_flight = roster.len(), "draining client connections");
        }
        for serving in roster {
            let _ = serving.join();
        }

        tracing::info!("server stopped");
        outcome
    }

    /// Spawn the serving thread for one accepted client.
    fn serve_on_thread(&self, stream: TcpStream, addr: SocketAddr) -> Result<JoinHandle<()>> {
        let handler = Arc::clone(&self.handler);
        let stop = Arc::clone(&self.shutdown);
        let gauge = ActiveGuard::enter(Arc::clone(&self.active));
        let read_ms = self.config.read_timeout_ms;
        let write_ms = self.config.write_timeout_ms;

        tracing::debug!(peer = %addr, "client connected");
        thread::Builder::new()
            .name(format!("meridian-client-{}", addr.port()))
            .spawn(move || {
                let _gauge = gauge;
                let mut conn = match Connection::new(stream, handler, stop) {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::debug!(peer = %addr, "client setup failed: {}", e);
                        return;
                    }
                };
                if let Err(e) = conn.set_timeouts(read_ms, write_ms) {
                    tracing::debug!(peer = %addr, "timeout setup failed: {}", e);
                }
                match conn.handle() {
                    Ok(()) => tracing::debug!(peer = %addr, "client disconnected"),
                    Err(e) => tracing::debug!(peer = %addr, "client dropped: {}", e),
                }
            })
            .map_err(|e| MeridianError::Network(format!("failed to spawn client thread: {}", e)))
    }

    /// Handle for signaling shutdown from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    /// Number of clients currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Get the bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Keeps the live-connection gauge honest: incremented on entry,
/// decremented when the serving thread ends for any reason.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(gauge: Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        ActiveGuard(gauge)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Tell an over-capacity client why it is being dropped before closing.
fn turn_away(mut stream: TcpStream) {
    let busy = MeridianError::Unavailable("connection limit reached".to_string());
    let _ = write_line(&mut stream, &Response::from_error(&busy));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    struct OkHandler;

    impl RequestHandler for OkHandler {
        fn handle(&self, _request: Request) -> Response {
            Response::ok()
        }
    }

    #[test]
    fn test_bind_reports_ephemeral_port() {
        let config = Config::builder().listen_addr("127.0.0.1:0").build();
        let server = Server::bind(config, Arc::new(OkHandler)).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.active_connections(), 0);
        assert!(!server.shutdown_handle().is_shutdown());
    }
}
