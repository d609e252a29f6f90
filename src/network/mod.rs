//! Network Module
//!
//! TCP server and client connection handling.
//!
//! ## Architecture
//! - Single acceptor loop polling a nonblocking listener
//! - One serving thread per client connection, joined on shutdown
//! - Requests routed through a [`RequestHandler`]
//!
//! The server knows nothing about replication modes: it frames lines and
//! hands parsed requests to the handler. [`KvService`] is the standard
//! handler, routing reads to the engine and writes to the mode-specific
//! [`WritePath`](crate::engine::WritePath).

mod connection;
mod server;
mod service;

pub use connection::Connection;
pub use server::{Server, ShutdownHandle};
pub use service::{KvService, SearchIndexes};

use crate::protocol::{Request, Response};

/// Handles parsed requests. One call per request; the caller preserves
/// per-connection order by invoking sequentially per connection.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Request) -> Response;

    /// False once the node can no longer honor durability (e.g. the
    /// engine was poisoned by repeated WAL failures). The server stops
    /// accepting when this turns false.
    fn healthy(&self) -> bool {
        true
    }
}
