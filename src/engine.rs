//! State Engine
//!
//! The core storage engine that coordinates WAL, map, and snapshots.
//!
//! ## Responsibilities
//! - Crash recovery on startup: snapshot load, then WAL replay
//! - Single-writer discipline for all mutating paths
//! - WAL-before-apply: nothing becomes visible before it is durable
//! - Snapshot policy (every N entries, forced on shutdown)
//! - Post-apply notifications to index observers
//!
//! ## Write phases
//! The cluster primary must not hold the writer lock across a network
//! wait, so the mutating path is split: [`StateEngine::log_entry`] makes
//! an entry durable, and [`StateEngine::apply_entry`] makes it visible.
//! [`StateEngine::submit_local`] fuses both for the single-node and
//! leaderless paths.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{MeridianError, Result};
use crate::index::ApplyObserver;
use crate::snapshot::SnapshotStore;
use crate::store::KvMap;
use crate::wal::{LogEntry, Operation, WalReader, WalWriter};

/// Consecutive WAL append failures before the engine refuses further
/// writes. Losing a replica is safer than lying about durability.
const MAX_CONSECUTIVE_IO_FAILURES: u32 = 3;

/// The mode-specific write route consulted by the request dispatcher.
///
/// This is the narrow seam between the server and whichever controller is
/// running: single node and leaderless submit locally, the cluster
/// controller adds role checks and majority acks.
pub trait WritePath: Send + Sync {
    fn submit(&self, op: Operation, simulate_fail: bool) -> Result<()>;
}

/// State behind the writer lock
struct WriterState {
    wal: WalWriter,
    entries_since_snapshot: u64,
    /// Frame sequences logged through the coordinated path but not yet
    /// applied. Snapshots must not cover them and rotation must not
    /// discard them.
    pending: BTreeSet<u64>,
}

/// A durable entry awaiting its apply phase (cluster primary path)
pub struct PendingWrite {
    pub entry: LogEntry,
    frame_seq: u64,
}

/// The storage engine for one data dir
pub struct StateEngine {
    config: Config,
    node_id: u32,
    map: KvMap,
    writer: Mutex<WriterState>,
    snapshots: SnapshotStore,

    /// Last durable WAL frame sequence
    last_seq: AtomicU64,

    /// Greatest origin sequence observed (local or replicated)
    max_origin_seq: AtomicU64,

    observers: RwLock<Vec<Arc<dyn ApplyObserver>>>,

    io_failures: AtomicU32,
    poisoned: AtomicBool,
}

impl StateEngine {
    /// Open the engine, recovering state from the data dir.
    ///
    /// Recovery order: load the snapshot (absent/corrupt loads as empty at
    /// sequence 0), then replay the WAL strictly after `snapshot_seq`,
    /// applying every well-formed entry and discarding a torn tail.
    pub fn open(config: Config, node_id: u32) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let snapshots = SnapshotStore::new(config.snapshot_path(), config.debug_fail_chance);
        let (image, snapshot_seq) = snapshots.load()?;
        let map = KvMap::from_snapshot(image);

        let mut max_origin_seq = 0u64;
        let mut last_seq = snapshot_seq;
        let mut replayed = 0u64;

        let mut reader = WalReader::open(&config.wal_path())?;
        while let Some(record) = reader.next_record()? {
            if record.frame_seq <= snapshot_seq {
                continue;
            }
            map.apply(&record.entry);
            last_seq = record.frame_seq;
            max_origin_seq = max_origin_seq.max(record.entry.seq);
            replayed += 1;
        }

        // A torn tail must be cut off before appending, or the partial
        // frame would shadow everything written after it on the next
        // replay. Only touch the file when there are actually trailing
        // bytes beyond the valid prefix.
        if reader.tail_was_torn() {
            let valid_len = reader.valid_len();
            drop(reader);
            let path = config.wal_path();
            let on_disk = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(valid_len);
            if on_disk > valid_len {
                let file = std::fs::OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
                tracing::warn!(valid_len, "truncated torn WAL tail");
            }
        }

        tracing::info!(
            snapshot_seq,
            replayed,
            keys = map.len(),
            "recovery complete"
        );

        let wal = WalWriter::open(&config.wal_path(), last_seq + 1)?;

        Ok(StateEngine {
            config,
            node_id,
            map,
            writer: Mutex::new(WriterState {
                wal,
                entries_since_snapshot: replayed,
                pending: BTreeSet::new(),
            }),
            snapshots,
            last_seq: AtomicU64::new(last_seq),
            max_origin_seq: AtomicU64::new(max_origin_seq),
            observers: RwLock::new(Vec::new()),
            io_failures: AtomicU32::new(0),
            poisoned: AtomicBool::new(false),
        })
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Get the live value for a key. Tombstones read as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key)
    }

    /// Node id this engine stamps on locally originated entries
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Last durable WAL frame sequence
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Greatest origin sequence observed across recovery and appends
    pub fn max_origin_seq(&self) -> u64 {
        self.max_origin_seq.load(Ordering::Acquire)
    }

    /// False once repeated WAL failures have poisoned the engine
    pub fn healthy(&self) -> bool {
        !self.poisoned.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Log and apply a locally originated operation.
    ///
    /// Assigns the origin stamp (wall-clock nanoseconds, this node's id),
    /// appends to the WAL with fsync, applies to the map, notifies
    /// observers, and runs the snapshot policy. Returns the durable entry
    /// for replication fan-out.
    pub fn submit_local(&self, op: Operation, simulate_fail: bool) -> Result<LogEntry> {
        let mut entry = LogEntry::new(self.node_id, op);
        let mut writer = self.writer.lock();
        self.append_locked(&mut writer, &mut entry)?;
        self.apply_locked(&mut writer, &entry, simulate_fail);
        Ok(entry)
    }

    /// Phase one of a coordinated write: make the entry durable without
    /// applying it. The entry keeps any pre-assigned origin sequence.
    /// The caller must resolve the returned write with
    /// [`StateEngine::apply_pending`] or [`StateEngine::abandon_pending`].
    pub fn log_entry(&self, mut entry: LogEntry) -> Result<PendingWrite> {
        let mut writer = self.writer.lock();
        let frame_seq = self.append_locked(&mut writer, &mut entry)?;
        writer.pending.insert(frame_seq);
        Ok(PendingWrite { entry, frame_seq })
    }

    /// Phase two of a coordinated write: apply an already durable entry.
    /// `simulate_fail` arms the snapshot fault switch as in
    /// [`StateEngine::submit_local`].
    pub fn apply_pending(&self, write: &PendingWrite, simulate_fail: bool) {
        let mut writer = self.writer.lock();
        writer.pending.remove(&write.frame_seq);
        self.apply_locked(&mut writer, &write.entry, simulate_fail);
    }

    /// Give up on a logged write (e.g. no majority). The entry stays
    /// durable and may resurface through recovery replay, which is
    /// acceptable for a never-acknowledged mutation; snapshots stop
    /// treating it as a hole.
    pub fn abandon_pending(&self, write: &PendingWrite) {
        let mut writer = self.writer.lock();
        writer.pending.remove(&write.frame_seq);
    }

    /// Append and apply an entry received from a peer. The entry's origin
    /// stamp and sequence are preserved; the local WAL frames it under its
    /// own sequence.
    pub fn apply_replicated(&self, mut entry: LogEntry) -> Result<()> {
        let mut writer = self.writer.lock();
        self.append_locked(&mut writer, &mut entry)?;
        self.apply_locked(&mut writer, &entry, false);
        Ok(())
    }

    /// Write a snapshot now, regardless of the entry counter. Used on
    /// graceful shutdown.
    pub fn snapshot_now(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        self.snapshot_locked(&mut writer, false);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Register an apply observer and drive it with a full scan of the
    /// current map, in place of any state it lost since the last run.
    pub fn register_observer(&self, observer: Arc<dyn ApplyObserver>) {
        self.map
            .scan_live(|key, value| observer.on_apply(key, Some(value)));
        self.observers.write().push(observer);
    }

    // -------------------------------------------------------------------------
    // Replication support
    // -------------------------------------------------------------------------

    /// Collect durable entries whose origin sequence is strictly greater
    /// than `after`, in origin order. Drives gap-fill resend to a lagging
    /// secondary. Only entries still in the current WAL file are
    /// available; rotation bounds the horizon.
    pub fn entries_with_origin_after(&self, after: u64) -> Result<Vec<LogEntry>> {
        let reader = WalReader::open(&self.config.wal_path())?;
        let mut entries: Vec<LogEntry> = Vec::new();
        for record in reader.replay(0) {
            let record = record?;
            if record.entry.seq > after {
                entries.push(record.entry);
            }
        }
        entries.sort_by_key(|e| e.seq);
        entries.dedup_by_key(|e| e.seq);
        Ok(entries)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn append_locked(&self, writer: &mut WriterState, entry: &mut LogEntry) -> Result<u64> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(MeridianError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "engine poisoned by repeated WAL failures",
            )));
        }

        match writer.wal.append(entry) {
            Ok(frame_seq) => {
                self.io_failures.store(0, Ordering::Release);
                self.last_seq.store(frame_seq, Ordering::Release);
                self.max_origin_seq.fetch_max(entry.seq, Ordering::AcqRel);
                writer.entries_since_snapshot += 1;
                Ok(frame_seq)
            }
            Err(e) => {
                // Only disk trouble counts toward poisoning; an entry
                // that cannot be serialized is the caller's problem.
                if matches!(e, MeridianError::Io(_)) {
                    let failures = self.io_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    tracing::error!("WAL append failed ({} consecutive): {}", failures, e);
                    if failures >= MAX_CONSECUTIVE_IO_FAILURES {
                        self.poisoned.store(true, Ordering::Release);
                        tracing::error!("engine poisoned; node will shut down");
                    }
                }
                Err(e)
            }
        }
    }

    /// Apply a durable entry to the map, notify observers in apply order,
    /// and run the snapshot policy. `force_snapshot` arms a snapshot
    /// attempt regardless of the counter (the debug fault path).
    fn apply_locked(&self, writer: &mut WriterState, entry: &LogEntry, force_snapshot: bool) {
        let changes = self.map.apply(entry);
        if !changes.is_empty() {
            let observers = self.observers.read();
            for change in &changes {
                for observer in observers.iter() {
                    observer.on_apply(&change.key, change.value.as_deref());
                }
            }
        }

        if force_snapshot || writer.entries_since_snapshot >= self.config.snapshot_every {
            self.snapshot_locked(writer, force_snapshot);
        }
    }

    /// Write a snapshot at the highest sequence with no logged-but-
    /// unapplied frame at or below it. Rotation is only permitted after a
    /// genuinely persisted snapshot covering the whole file; a pretended
    /// write (debug fault) leaves the WAL intact so replay still covers
    /// everything.
    fn snapshot_locked(&self, writer: &mut WriterState, simulate_fail: bool) {
        let last_seq = self.last_seq.load(Ordering::Acquire);
        let seq = match writer.pending.iter().next() {
            Some(&lowest_pending) => lowest_pending - 1,
            None => last_seq,
        };

        let image = self.map.to_image();
        match self.snapshots.write(&image, seq, simulate_fail) {
            Ok(true) if seq == last_seq => {
                if let Err(e) = writer.wal.rotate() {
                    tracing::warn!("WAL rotation after snapshot failed: {}", e);
                } else {
                    writer.entries_since_snapshot = 0;
                }
            }
            Ok(true) => {
                // Frames above `seq` must stay replayable; skip rotation.
            }
            Ok(false) => {
                // Pretended success: nothing persisted, counter keeps
                // accumulating so a real snapshot happens soon.
            }
            Err(e) => {
                tracing::warn!("snapshot write failed: {}", e);
            }
        }
    }
}

/// Single-node mode: the engine itself is the write path.
impl WritePath for StateEngine {
    fn submit(&self, op: Operation, simulate_fail: bool) -> Result<()> {
        self.submit_local(op, simulate_fail).map(|_| ())
    }
}
