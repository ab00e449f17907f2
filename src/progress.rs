// Copyright 2026 Martin Pool.

//! Records of which chunks of each transfer are already confirmed.
//!
//! A retried transfer against the same local buffer consults these records
//! to skip chunks that earlier attempts completed. Records live as long as
//! the store, which is owned by the client: they are not persisted.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

/// Identifies one transfer: who, through which local buffer, to which remote path.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TransferKey {
    pub identity: String,
    pub buffer: PathBuf,
    pub remote_path: String,
}

impl TransferKey {
    pub fn new(identity: &str, buffer: &Path, remote_path: &str) -> TransferKey {
        TransferKey {
            identity: identity.to_owned(),
            buffer: buffer.to_owned(),
            remote_path: remote_path.to_owned(),
        }
    }
}

type ChunkSet = Arc<Mutex<BTreeSet<u64>>>;

/// Confirmed chunk numbers per transfer.
///
/// The outer map is locked only long enough to find or insert a key's entry;
/// marking and checking chunks lock just that key's set, so transfers on
/// different keys don't contend.
#[derive(Debug, Default)]
pub struct ProgressStore {
    records: RwLock<HashMap<TransferKey, ChunkSet>>,
}

impl ProgressStore {
    pub fn new() -> ProgressStore {
        ProgressStore::default()
    }

    fn entry(&self, key: &TransferKey) -> Option<ChunkSet> {
        self.records
            .read()
            .expect("progress store lock poisoned")
            .get(key)
            .cloned()
    }

    fn entry_or_insert(&self, key: &TransferKey) -> ChunkSet {
        if let Some(set) = self.entry(key) {
            return set;
        }
        let mut records = self.records.write().expect("progress store lock poisoned");
        Arc::clone(records.entry(key.clone()).or_default())
    }

    /// True if this chunk was confirmed by an earlier attempt.
    pub fn is_confirmed(&self, key: &TransferKey, seq: u64) -> bool {
        self.entry(key)
            .map(|set| set.lock().expect("chunk set lock poisoned").contains(&seq))
            .unwrap_or(false)
    }

    /// Record that a chunk is complete.
    pub fn confirm(&self, key: &TransferKey, seq: u64) {
        trace!(?key, seq, "Confirm chunk");
        self.entry_or_insert(key)
            .lock()
            .expect("chunk set lock poisoned")
            .insert(seq);
    }

    /// Make sure a record exists for this transfer, even with no chunks yet.
    pub fn begin(&self, key: &TransferKey) {
        self.entry_or_insert(key);
    }

    /// Number of confirmed chunks for a transfer.
    pub fn confirmed_count(&self, key: &TransferKey) -> usize {
        self.entry(key)
            .map(|set| set.lock().expect("chunk set lock poisoned").len())
            .unwrap_or(0)
    }

    /// The confirmed chunk numbers, in order.
    pub fn confirmed(&self, key: &TransferKey) -> Vec<u64> {
        self.entry(key)
            .map(|set| {
                set.lock()
                    .expect("chunk set lock poisoned")
                    .iter()
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &TransferKey) -> bool {
        self.entry(key).is_some()
    }

    /// Drop the record for a completed transfer.
    pub fn remove(&self, key: &TransferKey) {
        trace!(?key, "Remove transfer record");
        self.records
            .write()
            .expect("progress store lock poisoned")
            .remove(key);
    }

    /// Drop every record for an identity, returning how many were removed.
    pub fn remove_identity(&self, identity: &str) -> usize {
        let mut records = self.records.write().expect("progress store lock poisoned");
        let before = records.len();
        records.retain(|key, _| key.identity != identity);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("progress store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The stores for both directions, shared by a session and its clones.
#[derive(Debug, Default)]
pub struct TransferCaches {
    /// Chunks fetched and saved in a local buffer.
    pub downloads: ProgressStore,
    /// Chunks the server has acknowledged.
    pub uploads: ProgressStore,
}

impl TransferCaches {
    pub fn new() -> Arc<TransferCaches> {
        Arc::new(TransferCaches::default())
    }

    pub fn remove_identity(&self, identity: &str) -> usize {
        self.downloads.remove_identity(identity) + self.uploads.remove_identity(identity)
    }
}
