//! Connection Handler
//!
//! Handles one client connection: reads request lines, dispatches each in
//! arrival order, writes exactly one response per request. Pipelining
//! within a connection works because the loop is strictly sequential.
//!
//! Reads poll with a short socket timeout so the loop can observe server
//! shutdown; the receive buffer persists across polls, so a request line
//! split over them is not lost.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{MeridianError, Result};
use crate::protocol::{write_line, Response, MAX_LINE_BYTES};

use super::RequestHandler;

/// Socket poll granularity
const READ_POLL: Duration = Duration::from_millis(500);

/// Handles a single client connection
pub struct Connection {
    stream: TcpStream,
    writer: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    stop: Arc<AtomicBool>,
    /// Close the connection after this much idle time; 0 disables
    idle_timeout_ms: u64,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        handler: Arc<dyn RequestHandler>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        stream.set_read_timeout(Some(READ_POLL))?;
        Ok(Connection {
            stream,
            writer,
            peer,
            handler,
            stop,
            idle_timeout_ms: 0,
        })
    }

    /// Apply timeouts; 0 disables the corresponding limit.
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        self.idle_timeout_ms = read_ms;
        self.writer.set_write_timeout(if write_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(write_ms))
        })?;
        Ok(())
    }

    /// Serve the connection until EOF, shutdown, a malformed request, or
    /// an IO error.
    pub fn handle(&mut self) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        let mut last_activity = Instant::now();

        while !self.stop.load(Ordering::Relaxed) {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    last_activity = Instant::now();
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if self.idle_timeout_ms > 0
                        && last_activity.elapsed() >= Duration::from_millis(self.idle_timeout_ms)
                    {
                        tracing::debug!("closing idle connection {}", self.peer);
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                let line = if line.last() == Some(&b'\r') {
                    &line[..line.len() - 1]
                } else {
                    line
                };
                if line.is_empty() {
                    continue;
                }
                self.serve_line(line)?;
            }

            if buffer.len() > MAX_LINE_BYTES {
                // Framing is lost; answer once and drop the connection.
                let e = MeridianError::Protocol(format!("line exceeds {} bytes", MAX_LINE_BYTES));
                let _ = write_line(&mut self.writer, &Response::from_error(&e));
                return Err(e);
            }
        }
        Ok(())
    }

    fn serve_line(&mut self, line: &[u8]) -> Result<()> {
        let request = match serde_json::from_slice(line) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::protocol_error(&e.to_string());
                let _ = write_line(&mut self.writer, &response);
                return Err(MeridianError::Protocol(e.to_string()));
            }
        };

        let response = self.handler.handle(request);
        write_line(&mut self.writer, &response)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
