//! Configuration for MeridianKV
//!
//! Centralized configuration with sensible defaults. Mode-specific settings
//! (cluster, leaderless) live with their controllers.

use std::path::{Path, PathBuf};

/// Main configuration for a MeridianKV node's storage and server layer
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory for all data files
    pub data_dir: PathBuf,

    /// WAL file name (relative to data_dir)
    pub wal_file: PathBuf,

    /// Snapshot file name (relative to data_dir)
    pub snapshot_file: PathBuf,

    /// Write a snapshot after this many WAL entries since the last one
    pub snapshot_every: u64,

    /// Probability that a debug-armed snapshot write pretends to succeed
    /// without persisting. WAL writes are never subject to this.
    pub debug_fail_chance: f64,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Enable the full-text and embedding-similarity index observers
    pub enable_indexes: bool,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address for the client protocol
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds); 0 leaves clients free to
    /// idle between requests
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./meridian_data"),
            wal_file: PathBuf::from("wal.log"),
            snapshot_file: PathBuf::from("snapshot.bin"),
            snapshot_every: 1000,
            debug_fail_chance: 0.5,
            enable_indexes: false,
            listen_addr: "127.0.0.1:7401".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Absolute path of the WAL file
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }

    /// Absolute path of the snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.data_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn snapshot_every(mut self, entries: u64) -> Self {
        self.config.snapshot_every = entries;
        self
    }

    pub fn debug_fail_chance(mut self, chance: f64) -> Self {
        self.config.debug_fail_chance = chance;
        self
    }

    pub fn enable_indexes(mut self, enabled: bool) -> Self {
        self.config.enable_indexes = enabled;
        self
    }

    pub fn listen_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
