//! Snapshot Store
//!
//! Atomic point-in-time image of the key-value map.
//!
//! ## File Format
//! ```text
//! ┌─────────┬─────────┬──────────────────────┐
//! │ Seq (8) │ CRC (4) │  bincode map bytes   │
//! └─────────┴─────────┴──────────────────────┘
//! ```
//!
//! A snapshot is written to `snapshot.tmp`, fsynced, renamed over
//! `snapshot.bin`, and the directory is fsynced. The prior snapshot is
//! only ever replaced by a fully durable successor.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::Result;
use crate::store::Record;

/// Header size: 8 bytes sequence + 4 bytes CRC32
const HEADER_SIZE: usize = 12;

/// Writes and loads snapshot files for one data dir
pub struct SnapshotStore {
    path: PathBuf,
    tmp_path: PathBuf,

    /// Probability that a debug-armed write pretends to succeed without
    /// persisting, modeling a crash before fsync. Never applied to the WAL.
    fail_chance: f64,
}

impl SnapshotStore {
    pub fn new(path: PathBuf, fail_chance: f64) -> Self {
        let tmp_path = path.with_extension("tmp");
        SnapshotStore {
            path,
            tmp_path,
            fail_chance,
        }
    }

    /// Serialize the full map at `seq` and atomically replace the snapshot.
    ///
    /// Returns whether the snapshot was actually persisted: a debug-armed
    /// call may pretend to succeed while writing nothing, in which case the
    /// WAL must not be rotated past `seq`.
    pub fn write(
        &self,
        map: &BTreeMap<String, Record>,
        seq: u64,
        simulate_fail: bool,
    ) -> Result<bool> {
        if simulate_fail && rand::thread_rng().gen::<f64>() < self.fail_chance {
            tracing::debug!(seq, "snapshot write skipped (simulated fsync failure)");
            return Ok(false);
        }

        let payload = bincode::serialize(map)?;
        let crc = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&payload);
            hasher.finalize()
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.tmp_path)?;
        file.write_all(&seq.to_be_bytes())?;
        file.write_all(&crc.to_be_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        self.sync_dir()?;

        tracing::debug!(seq, entries = map.len(), "snapshot persisted");
        Ok(true)
    }

    /// Load the snapshot, returning the map and the sequence it covers.
    ///
    /// A missing or corrupt snapshot loads as an empty map at sequence 0;
    /// recovery then falls back to replaying the WAL from the start.
    pub fn load(&self) -> Result<(BTreeMap<String, Record>, u64)> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((BTreeMap::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        if bytes.len() < HEADER_SIZE {
            tracing::warn!("snapshot too short; treating as absent");
            return Ok((BTreeMap::new(), 0));
        }

        let seq = u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let crc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let payload = &bytes[HEADER_SIZE..];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != crc {
            tracing::warn!("snapshot checksum mismatch; treating as absent");
            return Ok((BTreeMap::new(), 0));
        }

        match bincode::deserialize(payload) {
            Ok(map) => Ok((map, seq)),
            Err(e) => {
                tracing::warn!("snapshot undecodable ({}); treating as absent", e);
                Ok((BTreeMap::new(), 0))
            }
        }
    }

    /// Path of the canonical snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sync_dir(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }
}
