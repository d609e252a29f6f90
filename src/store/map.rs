//! KvMap implementation
//!
//! BTreeMap-based record map with RwLock for concurrency.
//! Uses parking_lot::RwLock which never poisons on panic.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::wal::{LogEntry, Operation};
use super::Record;

/// A key change that actually took effect, in apply order.
/// `value` is `None` for a deletion. Fed to index observers.
#[derive(Debug, Clone, PartialEq)]
pub struct MapChange {
    pub key: String,
    pub value: Option<String>,
}

/// In-memory map from key to versioned record
pub struct KvMap {
    data: RwLock<BTreeMap<String, Record>>,
}

impl KvMap {
    /// Create an empty map
    pub fn new() -> Self {
        KvMap {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a map from a recovered snapshot image
    pub fn from_snapshot(data: BTreeMap<String, Record>) -> Self {
        KvMap {
            data: RwLock::new(data),
        }
    }

    /// Get the live value for a key (read lock). Tombstones read as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let data = self.data.read();
        data.get(key).and_then(|record| {
            if record.tombstone {
                None
            } else {
                Some(record.value.clone())
            }
        })
    }

    /// Apply a log entry under the LWW rule (write lock).
    ///
    /// Each affected key is replaced only if the entry's
    /// (timestamp, origin) is strictly greater than the stored version.
    /// Returns the changes that took effect, in apply order.
    pub fn apply(&self, entry: &LogEntry) -> Vec<MapChange> {
        let mut data = self.data.write();
        let mut changes = Vec::new();

        match &entry.operation {
            Operation::Set { key, value } => {
                if let Some(change) =
                    lww_put(&mut data, key, Some(value.clone()), entry.timestamp, entry.origin)
                {
                    changes.push(change);
                }
            }
            Operation::Delete { key } => {
                if let Some(change) = lww_put(&mut data, key, None, entry.timestamp, entry.origin) {
                    changes.push(change);
                }
            }
            Operation::BulkSet { pairs } => {
                for (key, value) in pairs {
                    if let Some(change) =
                        lww_put(&mut data, key, Some(value.clone()), entry.timestamp, entry.origin)
                    {
                        changes.push(change);
                    }
                }
            }
        }

        changes
    }

    /// Count of keys, tombstones included
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Clone the full record map (for snapshot serialization)
    pub fn to_image(&self) -> BTreeMap<String, Record> {
        self.data.read().clone()
    }

    /// Visit every live (non-tombstone) pair, for index rebuilds
    pub fn scan_live<F: FnMut(&str, &str)>(&self, mut visit: F) {
        let data = self.data.read();
        for (key, record) in data.iter() {
            if !record.tombstone {
                visit(key, &record.value);
            }
        }
    }
}

impl Default for KvMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert or replace one key if the incoming version wins.
fn lww_put(
    data: &mut BTreeMap<String, Record>,
    key: &str,
    value: Option<String>,
    timestamp: u64,
    origin: u32,
) -> Option<MapChange> {
    let incoming = (timestamp, origin);
    if let Some(existing) = data.get(key) {
        if existing.version() >= incoming {
            return None;
        }
    }

    let tombstone = value.is_none();
    data.insert(
        key.to_string(),
        Record {
            value: value.clone().unwrap_or_default(),
            timestamp,
            origin,
            tombstone,
        },
    );
    Some(MapChange {
        key: key.to_string(),
        value,
    })
}
