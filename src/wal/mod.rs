//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append log entries before any mutation becomes visible
//! - CRC32 checksums for corruption detection
//! - Dense per-node sequence numbers for ordering
//! - Replay after a snapshot sequence, discarding a torn tail
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Len (4) │ Seq (8) │ CRC (4)│ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Len (4) │ Seq (8) │ CRC (4)│ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `Data` is the bincode-serialized [`LogEntry`]; the CRC covers it.

mod entry;
mod writer;
mod reader;

pub use entry::{now_nanos, LogEntry, Operation, FRAME_HEADER_SIZE, MAX_ENTRY_SIZE};
pub use reader::{WalReader, WalRecord};
pub use writer::WalWriter;
