//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and the frame codec.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{MeridianError, Result};

/// Frame header size: 4 bytes length + 8 bytes sequence + 4 bytes CRC32
pub const FRAME_HEADER_SIZE: usize = 16;

/// Maximum serialized entry size (16 MiB). A length above this is treated
/// as a corrupt frame rather than an allocation request.
pub const MAX_ENTRY_SIZE: usize = 16 * 1024 * 1024;

/// A single entry in the WAL
///
/// `seq` is the sequence assigned where the entry originated. On the origin
/// node it equals the WAL frame sequence; a replicated entry keeps its
/// origin sequence while the receiving WAL frames it under its own local
/// sequence. Sequence 0 means "not yet assigned".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Origin sequence number; 0 until assigned
    pub seq: u64,

    /// Node id where this entry originated
    pub origin: u32,

    /// Wall-clock nanoseconds at the origin; the LWW order key
    pub timestamp: u64,

    /// The operation to perform
    pub operation: Operation,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Set a key to a value
    Set { key: String, value: String },

    /// Delete a key (records a tombstone)
    Delete { key: String },

    /// Set multiple pairs atomically
    BulkSet { pairs: Vec<(String, String)> },
}

impl LogEntry {
    /// New unassigned entry stamped with the current wall clock
    pub fn new(origin: u32, operation: Operation) -> Self {
        LogEntry {
            seq: 0,
            origin,
            timestamp: now_nanos(),
            operation,
        }
    }

    /// Serialize the entry payload (frame data, without the header)
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize an entry payload
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// CRC32 over the serialized payload
    pub fn compute_crc(payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    /// Build the on-disk frame for this entry under the given frame sequence
    pub fn encode_frame(&self, frame_seq: u64) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        if payload.len() > MAX_ENTRY_SIZE {
            return Err(MeridianError::Serialization(format!(
                "entry payload of {} bytes exceeds max {}",
                payload.len(),
                MAX_ENTRY_SIZE
            )));
        }
        let crc = Self::compute_crc(&payload);

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&frame_seq.to_be_bytes());
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

/// Current wall clock as nanoseconds since the Unix epoch.
///
/// This is the LWW record timestamp. Elapsed-time checks elsewhere use
/// `Instant`; the wall clock is only for conflict ordering.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
