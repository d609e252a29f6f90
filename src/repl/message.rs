//! Replication messages
//!
//! Typed messages exchanged on the repl port, one JSON line each.

use serde::{Deserialize, Serialize};

use crate::wal::LogEntry;

/// A message between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Ship one log entry. `term` is the sender's election term so a
    /// stale primary's entries can be rejected; leaderless nodes send 0.
    AppendEntry { term: u64, entry: LogEntry },

    /// Liveness and progress advertisement. The primary broadcasts it
    /// every heartbeat interval; secondaries reply with their own
    /// `last_seq`, which doubles as the append acknowledgment and drives
    /// gap-fill resend.
    Heartbeat {
        term: u64,
        node_id: u32,
        last_seq: u64,
    },

    /// Candidate solicitation for one election term
    RequestVote {
        term: u64,
        candidate_id: u32,
        last_seq: u64,
    },

    /// Vote reply
    Vote {
        term: u64,
        node_id: u32,
        granted: bool,
    },
}
