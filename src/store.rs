//! BlobStore trait - the narrow capability the settings core persists through.
//!
//! A blob store is a flat namespace of keys, each holding one opaque byte
//! blob. Writes may be buffered by the backend until [`BlobStore::flush`];
//! that is the single point where they become durable.
//!
//! None of the operations report errors. A backend logs its own failures
//! and behaves as if the operation did nothing, so the core only ever sees
//! "present" or "absent".

use crate::error::{Result, SettingsError};
use crate::watch::WatchStream;

/// Maximum key length in bytes (the NVS key limit, excluding terminator).
pub const MAX_KEY_LENGTH: usize = 15;

/// Validate that a key is usable as a storage key.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SettingsError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(SettingsError::InvalidKey(format!(
            "{key:?} exceeds maximum length of {MAX_KEY_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Byte-oriented key/value persistence backend.
///
/// Implementations must be usable from several tasks at once; the core
/// shares one store between all data items of a namespace.
pub trait BlobStore: Send + Sync {
    /// Size in bytes of the blob stored under `key`, 0 if absent.
    fn size(&self, key: &str) -> usize;

    /// Load the blob under `key` into `buf`.
    ///
    /// Returns `false` if the key is absent or its blob length differs from
    /// `buf.len()`; `buf` is left unspecified in that case.
    fn load(&self, key: &str, buf: &mut [u8]) -> bool;

    /// Write `bytes` under `key`, replacing any previous blob. Best effort.
    fn store(&self, key: &str, bytes: &[u8]);

    /// Remove `key`. Erasing an absent key is not an error.
    fn erase(&self, key: &str);

    /// Make all previous writes and erases durable. Best effort.
    fn flush(&self);

    /// Watch physical operations on keys matching a pattern.
    ///
    /// Pattern can be an exact key or end with `*` for prefix matching.
    /// Backends without change streams return `None`.
    fn watch(&self, _pattern: &str) -> Option<WatchStream> {
        None
    }

    /// Check if a key holds a blob.
    fn contains(&self, key: &str) -> bool {
        self.size(key) > 0
    }

    /// Load the whole blob under `key`, if any.
    fn load_vec(&self, key: &str) -> Option<Vec<u8>> {
        let size = self.size(key);
        if size == 0 {
            return None;
        }
        let mut buf = vec![0u8; size];
        self.load(key, &mut buf).then_some(buf)
    }
}
