//! WAL Writer
//!
//! Handles appending entries to the WAL file. Every append is flushed and
//! fsynced before it returns: an `Ok` from [`WalWriter::append`] means the
//! entry is on durable storage.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use super::LogEntry;

/// Writes entries to the WAL file
pub struct WalWriter {
    /// File handle held open in append mode
    file: File,

    /// Next frame sequence to assign
    next_seq: u64,

    /// Path, kept for diagnostics
    path: PathBuf,
}

impl WalWriter {
    /// Open the WAL in append mode, continuing from `next_seq`.
    ///
    /// Recovery determines `next_seq` by replaying the existing file; a
    /// fresh data dir starts at 1 (sequence 0 is reserved).
    pub fn open(path: &Path, next_seq: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(WalWriter {
            file,
            next_seq,
            path: path.to_path_buf(),
        })
    }

    /// Append an entry, fsync, and return the assigned frame sequence.
    ///
    /// If the entry has no origin sequence yet (`seq == 0`), the frame
    /// sequence is written into it, so locally originated entries carry
    /// their durable position. Replicated entries keep their origin
    /// sequence; only the frame header gets the local one.
    ///
    /// On error the entry must be treated as not durable.
    pub fn append(&mut self, entry: &mut LogEntry) -> Result<u64> {
        let seq = self.next_seq;
        if entry.seq == 0 {
            entry.seq = seq;
        }

        let frame = entry.encode_frame(seq)?;
        self.file.write_all(&frame)?;
        self.file.sync_all()?;

        // Only advance after the frame is durable; a failed append is
        // retried under the same sequence.
        self.next_seq = seq + 1;
        Ok(seq)
    }

    /// Rotate to a fresh file, keeping the sequence counter.
    ///
    /// Only legal once a snapshot at or after every sequence in the current
    /// file is durable; the engine enforces that. Sequences stay gap-free
    /// across the life of the data dir.
    pub fn rotate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        tracing::debug!("rotated WAL at {}", self.path.display());
        Ok(())
    }

    /// Frame sequence of the most recent durable append (0 if none yet)
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Next frame sequence to be assigned
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Path of the WAL file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
