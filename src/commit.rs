//! Deferred commits: many logical writes, one physical write per key.
//!
//! Persisted data items do not write when their value changes. They
//! register a [`PendingWrite`] under their storage key with the
//! [`CommitBatcher`]; a later registration for the same key replaces the
//! earlier one. [`CommitBatcher::commit`] then writes each registered key
//! once, using the value the item holds at that moment, and flushes the
//! blob store a single time.
//!
//! The batcher is an ordinary value: create one per blob store at startup
//! and hand an `Arc` of it to every persisted item of that store.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::store::BlobStore;

/// Something that can write its current value to the blob store.
pub trait PendingWrite: Send + Sync {
    /// Write the current value under `key`.
    ///
    /// Returns `false` if there was nothing to write because the owning
    /// item no longer exists.
    fn materialize(&self, key: &str, store: &dyn BlobStore) -> bool;
}

/// Identity of a registrant, used so that a registrant only ever withdraws
/// its own registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

struct Registration {
    owner: RegistrationId,
    writer: Arc<dyn PendingWrite>,
}

/// Outcome of one commit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Keys materialized into the blob store.
    pub written: usize,
    /// Registrations whose item was already gone.
    pub skipped: usize,
}

/// Registry coalescing deferred writes into one commit pass.
pub struct CommitBatcher {
    store: Arc<dyn BlobStore>,
    pending: Mutex<BTreeMap<String, Registration>>,
    next_id: AtomicU64,
}

impl CommitBatcher {
    /// Create a batcher writing to `store`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The blob store this batcher commits to.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Allocate a fresh registrant identity.
    pub fn next_registration_id(&self) -> RegistrationId {
        RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `writer` as the pending write for `key`, replacing any
    /// earlier registration for that key.
    pub fn register(&self, key: &str, owner: RegistrationId, writer: Arc<dyn PendingWrite>) {
        self.pending
            .lock()
            .insert(key.to_string(), Registration { owner, writer });
    }

    /// Remove the registration for `key` if it belongs to `owner`.
    ///
    /// Returns whether a registration was removed.
    pub fn withdraw(&self, key: &str, owner: RegistrationId) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(key) {
            Some(registration) if registration.owner == owner => {
                pending.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drop any pending write for `key` and erase its stored blob.
    pub fn erase(&self, key: &str) {
        let mut pending = self.pending.lock();
        pending.remove(key);
        self.store.erase(key);
    }

    /// Check if `key` has a pending write.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Number of keys with a pending write.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Keys with a pending write, in lexicographic order.
    pub fn pending_keys(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }

    /// Write every pending key once, clear the registry and flush the store.
    ///
    /// The registry stays locked for the whole pass, so registrations made
    /// concurrently land in the next cycle.
    pub fn commit(&self) -> CommitStats {
        let mut pending = self.pending.lock();
        let mut stats = CommitStats::default();

        for (key, registration) in pending.iter() {
            if registration.writer.materialize(key, self.store.as_ref()) {
                stats.written += 1;
            } else {
                stats.skipped += 1;
            }
        }
        pending.clear();

        self.store.flush();
        debug!(
            written = stats.written,
            skipped = stats.skipped,
            "commit pass complete"
        );
        stats
    }
}

impl fmt::Debug for CommitBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitBatcher")
            .field("pending", &self.pending_keys())
            .finish()
    }
}

impl Drop for CommitBatcher {
    fn drop(&mut self) {
        let pending = self.pending.get_mut();
        if !pending.is_empty() {
            warn!(
                keys = ?pending.keys().collect::<Vec<_>>(),
                "dropping uncommitted settings"
            );
        }
        self.store.flush();
    }
}

/// Commit `batcher` every `period` until `shutdown` turns true (or its
/// sender goes away), then commit one final time.
///
/// Ticks with nothing pending are skipped. Commits run on the blocking
/// pool because blob stores block. Returns the number of commit passes.
pub async fn run_periodic_commit(
    batcher: Arc<CommitBatcher>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut commits = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if batcher.pending_len() == 0 {
                    continue;
                }
                commit_blocking(&batcher).await;
                commits += 1;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    commit_blocking(&batcher).await;
    commits + 1
}

async fn commit_blocking(batcher: &Arc<CommitBatcher>) -> CommitStats {
    let batcher = batcher.clone();
    match tokio::task::spawn_blocking(move || batcher.commit()).await {
        Ok(stats) => stats,
        Err(e) => {
            error!("commit task failed: {}", e);
            CommitStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;
    use parking_lot::RwLock;
    use std::sync::Weak;

    struct Cell {
        value: Weak<RwLock<Vec<u8>>>,
    }

    impl PendingWrite for Cell {
        fn materialize(&self, key: &str, store: &dyn BlobStore) -> bool {
            match self.value.upgrade() {
                Some(value) => {
                    store.store(key, &value.read());
                    true
                }
                None => false,
            }
        }
    }

    fn setup() -> (Arc<MemoryBlobStore>, CommitBatcher) {
        let store = Arc::new(MemoryBlobStore::new());
        let batcher = CommitBatcher::new(store.clone());
        (store, batcher)
    }

    fn writer(value: &Arc<RwLock<Vec<u8>>>) -> Arc<dyn PendingWrite> {
        Arc::new(Cell {
            value: Arc::downgrade(value),
        })
    }

    #[test]
    fn test_commit_writes_value_at_commit_time() {
        let (store, batcher) = setup();
        let value = Arc::new(RwLock::new(vec![1]));
        let id = batcher.next_registration_id();

        batcher.register("k", id, writer(&value));
        *value.write() = vec![2];

        let stats = batcher.commit();
        assert_eq!(stats, CommitStats { written: 1, skipped: 0 });
        assert_eq!(store.get_contents("k"), Some(vec![2]));
        assert_eq!(store.flush_count(), 1);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[test]
    fn test_register_same_key_overwrites() {
        let (store, batcher) = setup();
        let first = Arc::new(RwLock::new(vec![1]));
        let second = Arc::new(RwLock::new(vec![2]));

        batcher.register("k", batcher.next_registration_id(), writer(&first));
        batcher.register("k", batcher.next_registration_id(), writer(&second));
        assert_eq!(batcher.pending_keys(), vec!["k".to_string()]);

        batcher.commit();
        assert_eq!(store.write_count("k"), 1);
        assert_eq!(store.get_contents("k"), Some(vec![2]));
    }

    #[test]
    fn test_withdraw_only_own_registration() {
        let (_store, batcher) = setup();
        let value = Arc::new(RwLock::new(vec![1]));
        let old = batcher.next_registration_id();
        let new = batcher.next_registration_id();

        batcher.register("k", new, writer(&value));
        assert!(!batcher.withdraw("k", old));
        assert!(batcher.is_pending("k"));

        assert!(batcher.withdraw("k", new));
        assert!(!batcher.is_pending("k"));
    }

    #[test]
    fn test_erase_drops_pending_write() {
        let (store, batcher) = setup();
        store.store("k", &[9]);
        let value = Arc::new(RwLock::new(vec![1]));
        batcher.register("k", batcher.next_registration_id(), writer(&value));

        batcher.erase("k");
        assert!(!batcher.is_pending("k"));
        assert!(!store.contains("k"));

        batcher.commit();
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_commit_skips_dropped_items() {
        let (store, batcher) = setup();
        let value = Arc::new(RwLock::new(vec![1]));
        batcher.register("k", batcher.next_registration_id(), writer(&value));
        drop(value);

        let stats = batcher.commit();
        assert_eq!(stats, CommitStats { written: 0, skipped: 1 });
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_empty_commit_still_flushes() {
        let (store, batcher) = setup();
        assert_eq!(batcher.commit(), CommitStats::default());
        assert_eq!(store.flush_count(), 1);
    }

    #[test]
    fn test_drop_flushes_store() {
        let (store, batcher) = setup();
        drop(batcher);
        assert_eq!(store.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_periodic_commit_writes_and_stops() {
        let store = Arc::new(MemoryBlobStore::new());
        let batcher = Arc::new(CommitBatcher::new(store.clone()));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_periodic_commit(
            batcher.clone(),
            Duration::from_millis(10),
            rx,
        ));

        let value = Arc::new(RwLock::new(vec![4]));
        batcher.register("k", batcher.next_registration_id(), writer(&value));

        for _ in 0..100 {
            if store.contains("k") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get_contents("k"), Some(vec![4]));

        tx.send(true).unwrap();
        let commits = task.await.unwrap();
        assert!(commits >= 2);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_periodic_commit_final_pass_on_shutdown() {
        let store = Arc::new(MemoryBlobStore::new());
        let batcher = Arc::new(CommitBatcher::new(store.clone()));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_periodic_commit(
            batcher.clone(),
            Duration::from_secs(3600),
            rx,
        ));

        let value = Arc::new(RwLock::new(vec![8]));
        batcher.register("k", batcher.next_registration_id(), writer(&value));
        drop(tx);

        assert_eq!(task.await.unwrap(), 1);
        assert_eq!(store.get_contents("k"), Some(vec![8]));
    }
}
