//! In-memory blob store implementation.
//!
//! Models the parts of a flash key/value partition the settings core cares
//! about: writes are visible to reads immediately but only survive a
//! simulated power cycle once flushed. Every physical write, erase and
//! flush is counted so tests can assert on wear.
//!
//! This implementation is NOT durable - data is lost on process exit.
//! Use for testing and host-side simulation only.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::store::{validate_key, BlobStore};
use crate::watch::{BlobEvent, WatchSender, WatchStream};

#[derive(Default)]
struct Partition {
    /// What reads observe.
    live: BTreeMap<String, Vec<u8>>,
    /// What survives a power cycle.
    durable: BTreeMap<String, Vec<u8>>,
    writes: HashMap<String, u32>,
    erases: HashMap<String, u32>,
    flushes: u32,
}

/// In-memory implementation of BlobStore.
///
/// Uses a BTreeMap for ordered key iteration and RwLock for concurrency.
pub struct MemoryBlobStore {
    namespace: String,
    data: RwLock<Partition>,
    watcher: WatchSender,
}

impl MemoryBlobStore {
    /// Create a new empty store for the default `"storage"` namespace.
    pub fn new() -> Self {
        Self::with_namespace("storage")
    }

    /// Create a new empty store for a named namespace.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            data: RwLock::new(Partition::default()),
            watcher: WatchSender::new(1024),
        }
    }

    /// The namespace this store was opened for.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get the number of keys currently visible.
    pub fn len(&self) -> usize {
        self.data.read().live.len()
    }

    /// Check if no key is currently visible.
    pub fn is_empty(&self) -> bool {
        self.data.read().live.is_empty()
    }

    /// Visible keys in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.data.read().live.keys().cloned().collect()
    }

    /// Copy of the visible blob under `key` (for test verification).
    pub fn get_contents(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().live.get(key).cloned()
    }

    /// Copy of the blob under `key` as of the last flush.
    pub fn durable_contents(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().durable.get(key).cloned()
    }

    /// Number of physical writes issued for `key`.
    pub fn write_count(&self, key: &str) -> u32 {
        self.data.read().writes.get(key).copied().unwrap_or(0)
    }

    /// Number of physical writes issued across all keys.
    pub fn total_write_count(&self) -> u32 {
        self.data.read().writes.values().sum()
    }

    /// Number of erases issued for `key`, including erases of absent keys.
    pub fn erase_count(&self, key: &str) -> u32 {
        self.data.read().erases.get(key).copied().unwrap_or(0)
    }

    /// Number of flushes performed.
    pub fn flush_count(&self) -> u32 {
        self.data.read().flushes
    }

    /// Forget the wear counters, keeping the contents.
    pub fn reset_counters(&self) {
        let mut data = self.data.write();
        data.writes.clear();
        data.erases.clear();
        data.flushes = 0;
    }

    /// Place raw bytes under `key`, bypassing counters and events.
    ///
    /// Used to simulate legacy or corrupt data already on the medium; the
    /// blob is durable immediately.
    pub fn inject_blob(&self, key: &str, bytes: &[u8]) {
        let mut data = self.data.write();
        data.live.insert(key.to_string(), bytes.to_vec());
        data.durable.insert(key.to_string(), bytes.to_vec());
    }

    /// Simulate power loss: everything written since the last flush is lost.
    pub fn simulate_power_cycle(&self) {
        let mut data = self.data.write();
        data.live = data.durable.clone();
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn size(&self, key: &str) -> usize {
        self.data.read().live.get(key).map_or(0, Vec::len)
    }

    fn load(&self, key: &str, buf: &mut [u8]) -> bool {
        let data = self.data.read();
        match data.live.get(key) {
            Some(blob) if blob.len() == buf.len() => {
                buf.copy_from_slice(blob);
                true
            }
            Some(blob) => {
                warn!(
                    key,
                    stored = blob.len(),
                    requested = buf.len(),
                    "blob length mismatch"
                );
                false
            }
            None => false,
        }
    }

    fn store(&self, key: &str, bytes: &[u8]) {
        if let Err(e) = validate_key(key) {
            warn!("error setting {}: {}", key, e);
            return;
        }

        let mut data = self.data.write();
        data.live.insert(key.to_string(), bytes.to_vec());
        *data.writes.entry(key.to_string()).or_default() += 1;
        drop(data);

        self.watcher.send(BlobEvent::stored(key, bytes.to_vec()));
    }

    fn erase(&self, key: &str) {
        let mut data = self.data.write();
        data.live.remove(key);
        *data.erases.entry(key.to_string()).or_default() += 1;
        drop(data);

        self.watcher.send(BlobEvent::erased(key));
    }

    fn flush(&self) {
        let mut data = self.data.write();
        data.durable = data.live.clone();
        data.flushes += 1;
        drop(data);

        self.watcher.send(BlobEvent::flushed(&self.namespace));
    }

    fn watch(&self, pattern: &str) -> Option<WatchStream> {
        Some(self.watcher.subscribe(pattern))
    }
}
