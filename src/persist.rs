//! Persistence policies: how a data item's value is defaulted, loaded,
//! reset and scheduled for writing.
//!
//! The persisted variants never write synchronously. `defer_store`
//! registers a writer with the [`CommitBatcher`], which reads the item's
//! cell when the next commit runs.

use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::codec::{decode_elements, encode_elements, whole_elements, zeroed, BlobValue};
use crate::commit::{CommitBatcher, PendingWrite, RegistrationId};
use crate::store::BlobStore;

/// Shared cell holding a data item's value.
pub type ValueCell<T> = Arc<RwLock<T>>;

/// Strategy for defaulting, loading, resetting and storing a value.
pub trait Storage<T>: Send + Sync {
    /// A fresh copy of the default value.
    fn default_value(&self) -> T;

    /// Put the default value into `value`. Stored data is untouched.
    fn default_into(&self, value: &mut T);

    /// Load the stored value into `value`, falling back to the default.
    ///
    /// Returns whether `value` may have changed.
    fn load_or_default_into(&self, value: &mut T) -> bool;

    /// Put the default value into `value` and drop the stored value.
    fn reset_into(&self, value: &mut T);

    /// Schedule the value held by `cell` to be written on the next commit.
    fn defer_store(&self, cell: &ValueCell<T>);

    /// Storage key, if the value is persisted.
    fn key(&self) -> Option<&str> {
        None
    }
}

/// Keeps the value in memory only.
pub struct NoStorage<T> {
    default: T,
}

impl<T> NoStorage<T> {
    /// Create a policy resetting to `default`.
    pub fn new(default: T) -> Self {
        Self { default }
    }
}

impl<T: Clone + Send + Sync> Storage<T> for NoStorage<T> {
    fn default_value(&self) -> T {
        self.default.clone()
    }

    fn default_into(&self, value: &mut T) {
        *value = self.default.clone();
    }

    fn load_or_default_into(&self, _value: &mut T) -> bool {
        false
    }

    fn reset_into(&self, value: &mut T) {
        *value = self.default.clone();
    }

    fn defer_store(&self, _cell: &ValueCell<T>) {}
}

/// Writes a scalar cell on commit.
struct ScalarWriter<T> {
    cell: Weak<RwLock<T>>,
}

impl<T: BlobValue + Send + Sync> PendingWrite for ScalarWriter<T> {
    fn materialize(&self, key: &str, store: &dyn BlobStore) -> bool {
        let Some(cell) = self.cell.upgrade() else {
            return false;
        };
        let blob = cell.read().to_blob();
        store.store(key, &blob);
        true
    }
}

/// Persists a scalar in the blob store under one key.
pub struct Persisted<T> {
    default: T,
    key: String,
    batcher: Arc<CommitBatcher>,
    id: RegistrationId,
}

impl<T> Persisted<T> {
    /// Create a policy for `key`, committing through `batcher`.
    pub fn new(default: T, key: impl Into<String>, batcher: Arc<CommitBatcher>) -> Self {
        let id = batcher.next_registration_id();
        Self {
            default,
            key: key.into(),
            batcher,
            id,
        }
    }
}

impl<T> Storage<T> for Persisted<T>
where
    T: BlobValue + Clone + Send + Sync + 'static,
{
    fn default_value(&self) -> T {
        self.default.clone()
    }

    fn default_into(&self, value: &mut T) {
        *value = self.default.clone();
    }

    /// Always reports a change, even when the stored value equals the
    /// value already held.
    fn load_or_default_into(&self, value: &mut T) -> bool {
        let store = self.batcher.store();
        let mut buf = vec![0u8; T::SIZE];
        let loaded = if store.load(&self.key, &mut buf) {
            T::decode(&buf)
        } else {
            None
        };

        match loaded {
            Some(stored) => *value = stored,
            None => {
                // Drop whatever unusable blob sits under the key.
                if store.size(&self.key) != 0 {
                    warn!(key = %self.key, "discarding unreadable stored value");
                    self.batcher.erase(&self.key);
                }
                *value = self.default.clone();
            }
        }
        true
    }

    fn reset_into(&self, value: &mut T) {
        self.batcher.erase(&self.key);
        *value = self.default.clone();
    }

    fn defer_store(&self, cell: &ValueCell<T>) {
        let writer = Arc::new(ScalarWriter {
            cell: Arc::downgrade(cell),
        });
        self.batcher.register(&self.key, self.id, writer);
    }

    fn key(&self) -> Option<&str> {
        Some(&self.key)
    }
}

impl<T> Drop for Persisted<T> {
    fn drop(&mut self) {
        self.batcher.withdraw(&self.key, self.id);
    }
}

/// Keeps a sequence in memory only; the default is empty.
pub struct NoVectorStorage<E> {
    _marker: PhantomData<fn() -> E>,
}

impl<E> NoVectorStorage<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E> Default for NoVectorStorage<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + Sync> Storage<Vec<E>> for NoVectorStorage<E> {
    fn default_value(&self) -> Vec<E> {
        Vec::new()
    }

    fn default_into(&self, value: &mut Vec<E>) {
        value.clear();
    }

    fn load_or_default_into(&self, _value: &mut Vec<E>) -> bool {
        false
    }

    fn reset_into(&self, value: &mut Vec<E>) {
        value.clear();
    }

    fn defer_store(&self, _cell: &ValueCell<Vec<E>>) {}
}

/// Writes a sequence cell on commit; an empty sequence erases the key.
struct VectorWriter<E> {
    cell: Weak<RwLock<Vec<E>>>,
}

impl<E: BlobValue + Send + Sync> PendingWrite for VectorWriter<E> {
    fn materialize(&self, key: &str, store: &dyn BlobStore) -> bool {
        let Some(cell) = self.cell.upgrade() else {
            return false;
        };
        let blob = encode_elements(cell.read().as_slice());
        if blob.is_empty() {
            store.erase(key);
        } else {
            store.store(key, &blob);
        }
        true
    }
}

/// Persists a sequence as the concatenation of its elements.
pub struct PersistedVector<E> {
    key: String,
    batcher: Arc<CommitBatcher>,
    id: RegistrationId,
    _marker: PhantomData<fn() -> E>,
}

impl<E> PersistedVector<E> {
    /// Create a policy for `key`, committing through `batcher`.
    pub fn new(key: impl Into<String>, batcher: Arc<CommitBatcher>) -> Self {
        let id = batcher.next_registration_id();
        Self {
            key: key.into(),
            batcher,
            id,
            _marker: PhantomData,
        }
    }
}

impl<E> Storage<Vec<E>> for PersistedVector<E>
where
    E: BlobValue + Send + Sync + 'static,
{
    fn default_value(&self) -> Vec<E> {
        Vec::new()
    }

    fn default_into(&self, value: &mut Vec<E>) {
        value.clear();
    }

    /// A missing blob, or one that is not a whole number of elements, is
    /// treated as absent and reports no change. The target is still resized
    /// to the number of whole stored elements first: an absent key empties
    /// it, a partial element is truncated away and growth is zero-filled.
    fn load_or_default_into(&self, value: &mut Vec<E>) -> bool {
        let bytes = self.batcher.store().load_vec(&self.key).unwrap_or_default();
        resize_zeroed(value, whole_elements::<E>(bytes.len()));
        if bytes.is_empty() {
            return false;
        }
        match decode_elements(&bytes) {
            Some(items) => {
                *value = items;
                true
            }
            None => {
                debug!(key = %self.key, len = bytes.len(), "ignoring malformed stored sequence");
                false
            }
        }
    }

    fn reset_into(&self, value: &mut Vec<E>) {
        self.batcher.erase(&self.key);
        value.clear();
    }

    fn defer_store(&self, cell: &ValueCell<Vec<E>>) {
        let writer = Arc::new(VectorWriter {
            cell: Arc::downgrade(cell),
        });
        self.batcher.register(&self.key, self.id, writer);
    }

    fn key(&self) -> Option<&str> {
        Some(&self.key)
    }
}

fn resize_zeroed<E: BlobValue>(value: &mut Vec<E>, len: usize) {
    value.truncate(len);
    while value.len() < len {
        match zeroed() {
            Some(item) => value.push(item),
            None => break,
        }
    }
}

impl<E> Drop for PersistedVector<E> {
    fn drop(&mut self) {
        self.batcher.withdraw(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;

    fn setup() -> (Arc<MemoryBlobStore>, Arc<CommitBatcher>) {
        let store = Arc::new(MemoryBlobStore::new());
        let batcher = Arc::new(CommitBatcher::new(store.clone()));
        (store, batcher)
    }

    #[test]
    fn test_no_storage() {
        let policy = NoStorage::new(5u32);
        let mut value = 9;

        assert!(!policy.load_or_default_into(&mut value));
        assert_eq!(value, 9);

        policy.default_into(&mut value);
        assert_eq!(value, 5);

        value = 9;
        policy.reset_into(&mut value);
        assert_eq!(value, 5);
        assert_eq!(policy.key(), None);
    }

    #[test]
    fn test_persisted_load_present() {
        let (store, batcher) = setup();
        store.inject_blob("k", &9u32.to_ne_bytes());

        let policy = Persisted::new(5u32, "k", batcher);
        let mut value = 0;
        assert!(policy.load_or_default_into(&mut value));
        assert_eq!(value, 9);
    }

    #[test]
    fn test_persisted_load_absent_reports_change() {
        let (store, batcher) = setup();
        let policy = Persisted::new(5u32, "k", batcher);

        let mut value = 5;
        assert!(policy.load_or_default_into(&mut value));
        assert_eq!(value, 5);
        assert_eq!(store.erase_count("k"), 0);
    }

    #[test]
    fn test_persisted_load_wrong_size_falls_back() {
        let (store, batcher) = setup();
        store.inject_blob("k", &[1, 2]);
        let policy = Persisted::new(5u32, "k", batcher);

        let mut value = 0;
        assert!(policy.load_or_default_into(&mut value));
        assert_eq!(value, 5);
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_persisted_defer_store_waits_for_commit() {
        let (store, batcher) = setup();
        let policy = Persisted::new(5u32, "k", batcher.clone());
        let cell = Arc::new(RwLock::new(7u32));

        policy.defer_store(&cell);
        assert!(!store.contains("k"));
        assert!(batcher.is_pending("k"));

        batcher.commit();
        assert_eq!(store.get_contents("k"), Some(7u32.to_ne_bytes().to_vec()));
    }

    #[test]
    fn test_persisted_reset_erases_and_withdraws() {
        let (store, batcher) = setup();
        store.inject_blob("k", &9u32.to_ne_bytes());
        let policy = Persisted::new(5u32, "k", batcher.clone());
        let cell = Arc::new(RwLock::new(7u32));
        policy.defer_store(&cell);

        let mut value = 7;
        policy.reset_into(&mut value);
        assert_eq!(value, 5);
        assert!(!store.contains("k"));
        assert!(!batcher.is_pending("k"));
    }

    #[test]
    fn test_persisted_default_keeps_stored_value() {
        let (store, batcher) = setup();
        store.inject_blob("k", &9u32.to_ne_bytes());
        let policy = Persisted::new(5u32, "k", batcher);

        let mut value = 9;
        policy.default_into(&mut value);
        assert_eq!(value, 5);
        assert!(store.contains("k"));
    }

    #[test]
    fn test_persisted_drop_withdraws_registration() {
        let (_store, batcher) = setup();
        let cell = Arc::new(RwLock::new(7u32));
        {
            let policy = Persisted::new(5u32, "k", batcher.clone());
            policy.defer_store(&cell);
            assert!(batcher.is_pending("k"));
        }
        assert!(!batcher.is_pending("k"));
    }

    #[test]
    fn test_persisted_drop_keeps_newer_owner() {
        let (_store, batcher) = setup();
        let cell = Arc::new(RwLock::new(7u32));
        let old = Persisted::new(5u32, "k", batcher.clone());
        let new = Persisted::new(5u32, "k", batcher.clone());

        new.defer_store(&cell);
        drop(old);
        assert!(batcher.is_pending("k"));
    }

    #[test]
    fn test_vector_load_valid() {
        let (store, batcher) = setup();
        store.inject_blob("v", &encode_elements(&[1u16, 2, 3]));
        let policy = PersistedVector::<u16>::new("v", batcher);

        let mut value = Vec::new();
        assert!(policy.load_or_default_into(&mut value));
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn test_vector_load_partial_element_truncates() {
        let (store, batcher) = setup();
        store.inject_blob("v", &[1, 0, 2]);
        let policy = PersistedVector::<u16>::new("v", batcher);

        let mut value = vec![42, 43, 44];
        assert!(!policy.load_or_default_into(&mut value));
        assert_eq!(value, vec![42]);
    }

    #[test]
    fn test_vector_load_partial_element_grows_zeroed() {
        let (store, batcher) = setup();
        store.inject_blob("v", &[1, 0, 2, 0, 3]);
        let policy = PersistedVector::<u16>::new("v", batcher);

        let mut value = vec![42];
        assert!(!policy.load_or_default_into(&mut value));
        assert_eq!(value, vec![42, 0]);
    }

    #[test]
    fn test_vector_load_absent_empties_target() {
        let (_store, batcher) = setup();
        let policy = PersistedVector::<u16>::new("v", batcher);

        let mut value = vec![42];
        assert!(!policy.load_or_default_into(&mut value));
        assert!(value.is_empty());
    }

    #[test]
    fn test_vector_empty_commit_erases_key() {
        let (store, batcher) = setup();
        store.inject_blob("v", &encode_elements(&[1u16]));
        let policy = PersistedVector::<u16>::new("v", batcher.clone());
        let cell = Arc::new(RwLock::new(Vec::<u16>::new()));

        policy.defer_store(&cell);
        batcher.commit();
        assert!(!store.contains("v"));
        assert_eq!(store.write_count("v"), 0);
    }

    #[test]
    fn test_vector_commit_concatenates_elements() {
        let (store, batcher) = setup();
        let policy = PersistedVector::<u16>::new("v", batcher.clone());
        let cell = Arc::new(RwLock::new(vec![1u16, 2]));

        policy.defer_store(&cell);
        batcher.commit();
        assert_eq!(store.get_contents("v"), Some(encode_elements(&[1u16, 2])));
    }

    #[test]
    fn test_no_vector_storage() {
        let policy = NoVectorStorage::<u8>::new();
        let mut value = vec![1, 2];
        assert!(!policy.load_or_default_into(&mut value));
        assert_eq!(value, vec![1, 2]);
        policy.reset_into(&mut value);
        assert!(value.is_empty());
    }
}
