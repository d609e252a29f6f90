//! Replication Module
//!
//! Peer-to-peer transport for shipping log entries and control messages.
//!
//! Each node accepts inbound peer connections on its repl port and keeps
//! one persistent outbound connection per peer, reconnecting with
//! exponential backoff. Messages are one-way per connection: a node's
//! replies to a peer travel over its own outbound link, correlated by
//! state rather than by connection.

mod message;
mod transport;

pub use message::PeerMessage;
pub use transport::{PeerSender, PeerSet, ReplListener};
