//! Construction helpers for data items.
//!
//! A [`Factory`] owns the commit batcher of one blob store. Each helper
//! takes an optional storage key: with a key the item is persisted through
//! the batcher, without one it lives in memory only. The display name
//! falls back to the key.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::codec::BlobValue;
use crate::commit::{run_periodic_commit, CommitBatcher, CommitStats};
use crate::config::{BackendConfig, SettingsConfig};
use crate::error::Result;
use crate::item::{DataItem, Value};
use crate::memory::MemoryBlobStore;
use crate::mutation::{Always, Bounded, Different};
use crate::persist::{NoStorage, NoVectorStorage, Persisted, PersistedVector, Storage};
use crate::sqlite::SqliteBlobStore;
use crate::store::{validate_key, BlobStore};

/// Builds data items bound to one commit batcher.
#[derive(Debug, Clone)]
pub struct Factory {
    batcher: Arc<CommitBatcher>,
    commit_interval: Option<Duration>,
}

impl Factory {
    /// Create a factory committing to `store`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_batcher(Arc::new(CommitBatcher::new(store)))
    }

    /// Create a factory sharing an existing batcher.
    pub fn with_batcher(batcher: Arc<CommitBatcher>) -> Self {
        Self {
            batcher,
            commit_interval: None,
        }
    }

    /// Open the configured backend and build a factory around it.
    pub fn from_config(config: &SettingsConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn BlobStore> = match &config.backend {
            BackendConfig::Memory => {
                Arc::new(MemoryBlobStore::with_namespace(config.namespace.clone()))
            }
            BackendConfig::Sqlite { path } => {
                Arc::new(SqliteBlobStore::open(path, config.namespace.clone())?)
            }
        };
        info!(
            namespace = %config.namespace,
            backend = ?config.backend,
            "settings store ready"
        );

        let mut factory = Self::new(store);
        factory.commit_interval = config.commit_interval();
        Ok(factory)
    }

    pub fn batcher(&self) -> &Arc<CommitBatcher> {
        &self.batcher
    }

    /// Commit every pending write now.
    pub fn commit(&self) -> CommitStats {
        self.batcher.commit()
    }

    /// Start the background committer if a commit interval is configured.
    ///
    /// Must be called from within a tokio runtime. The task commits one
    /// last time once `shutdown` turns true.
    pub fn spawn_periodic_commit(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<usize>> {
        let period = self.commit_interval?;
        Some(tokio::spawn(run_periodic_commit(
            self.batcher.clone(),
            period,
            shutdown,
        )))
    }

    fn storage<T>(&self, default: T, key: Option<&str>) -> Result<Box<dyn Storage<T>>>
    where
        T: BlobValue + Value,
    {
        let storage: Box<dyn Storage<T>> = match key {
            Some(key) => {
                validate_key(key)?;
                Box::new(Persisted::new(default, key, self.batcher.clone()))
            }
            None => Box::new(NoStorage::new(default)),
        };
        Ok(storage)
    }

    fn vector_storage<E>(&self, key: Option<&str>) -> Result<Box<dyn Storage<Vec<E>>>>
    where
        E: BlobValue + Value,
    {
        let storage: Box<dyn Storage<Vec<E>>> = match key {
            Some(key) => {
                validate_key(key)?;
                Box::new(PersistedVector::new(key, self.batcher.clone()))
            }
            None => Box::new(NoVectorStorage::new()),
        };
        Ok(storage)
    }

    /// Item whose `set` accepts every value.
    pub fn set_always<T>(
        &self,
        default: T,
        key: Option<&str>,
        name: Option<&str>,
    ) -> Result<DataItem<T>>
    where
        T: BlobValue + Value,
    {
        let storage = self.storage(default, key)?;
        Ok(DataItem::new(storage, display_name(key, name)).settable(Box::new(Always)))
    }

    /// Item whose `set` ignores the value it already holds.
    pub fn set_different<T>(
        &self,
        default: T,
        key: Option<&str>,
        name: Option<&str>,
    ) -> Result<DataItem<T>>
    where
        T: BlobValue + Value + PartialEq,
    {
        let storage = self.storage(default, key)?;
        Ok(DataItem::new(storage, display_name(key, name)).settable(Box::new(Different)))
    }

    /// Item whose `set` accepts new values in `[min, max)`.
    pub fn set_bounded<T>(
        &self,
        default: T,
        min: T,
        max: T,
        key: Option<&str>,
        name: Option<&str>,
    ) -> Result<DataItem<T>>
    where
        T: BlobValue + Value + PartialOrd,
    {
        let storage = self.storage(default, key)?;
        Ok(DataItem::new(storage, display_name(key, name))
            .settable(Box::new(Bounded::new(min, max))))
    }

    /// Item changed through `edit`.
    pub fn edit_data<T>(
        &self,
        default: T,
        key: Option<&str>,
        name: Option<&str>,
    ) -> Result<DataItem<T>>
    where
        T: BlobValue + Value,
    {
        let storage = self.storage(default, key)?;
        Ok(DataItem::new(storage, display_name(key, name)).editable())
    }

    /// Sequence item changed through `edit`, starting out empty.
    pub fn edit_vector<E>(&self, key: Option<&str>, name: Option<&str>) -> Result<DataItem<Vec<E>>>
    where
        E: BlobValue + Value,
    {
        let storage = self.vector_storage(key)?;
        Ok(DataItem::new(storage, display_name(key, name)).editable())
    }
}

/// The explicit name if given, otherwise the storage key.
fn display_name(key: Option<&str>, name: Option<&str>) -> Option<String> {
    name.or(key).map(str::to_string)
}
