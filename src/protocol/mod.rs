//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Wire Format
//!
//! Line-delimited JSON: every message is a single UTF-8 JSON object
//! terminated by `\n`. Requests carry an `op` tag; responses always carry
//! `ok` plus fields depending on the operation.
//!
//! ```text
//! → {"op":"set","key":"hello","value":"world"}
//! ← {"ok":true}
//! → {"op":"get","key":"hello"}
//! ← {"ok":true,"value":"world"}
//! → {"op":"get","key":"missing"}
//! ← {"ok":true,"found":false}
//! ← {"ok":false,"error":"not_primary","hint":{"primary_kv_port":7402}}
//! ```
//!
//! The replication plane reuses the same line framing with its own
//! message set (see `repl::PeerMessage`).

mod request;
mod response;
mod codec;

pub use codec::{read_line, write_line, MAX_LINE_BYTES};
pub use request::Request;
pub use response::Response;
