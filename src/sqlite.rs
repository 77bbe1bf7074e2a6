//! SQLite blob store implementation.
//!
//! Host-side stand-in for a flash key/value partition:
//! - One file can hold several namespaces, each an independent key space
//! - Stores and erases are staged in memory and visible to reads at once
//! - `flush()` applies the staged operations in a single SQL transaction
//! - Watch via in-memory channels (per-process)
//!
//! The [`BlobStore`] interface is synchronous, so the store drives `sqlx`
//! on a private single-threaded runtime. Calls made from inside another
//! tokio runtime are moved to a scoped helper thread.

use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SettingsError};
use crate::store::{validate_key, BlobStore};
use crate::watch::{BlobEvent, WatchSender, WatchStream};

/// Private runtime that is shut down without blocking when dropped, so the
/// store may be dropped from async code.
struct BlockingRuntime(Option<Runtime>);

impl BlockingRuntime {
    fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self(Some(runtime)))
    }

    fn block_on<F, T, E>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>> + Send,
        T: Send,
        E: Into<SettingsError> + Send,
    {
        let Some(runtime) = self.0.as_ref() else {
            return Err(SettingsError::ConnectionError(
                "runtime already shut down".to_string(),
            ));
        };
        let output = if Handle::try_current().is_err() {
            runtime.block_on(fut)
        } else {
            std::thread::scope(|scope| {
                match scope.spawn(move || runtime.block_on(fut)).join() {
                    Ok(output) => output,
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            })
        };
        output.map_err(Into::into)
    }
}

impl Drop for BlockingRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// SQLite implementation of BlobStore.
///
/// `None` in the staging map marks a pending erase.
pub struct SqliteBlobStore {
    namespace: String,
    pool: SqlitePool,
    staged: Mutex<BTreeMap<String, Option<Vec<u8>>>>,
    watcher: WatchSender,
    runtime: BlockingRuntime,
}

impl SqliteBlobStore {
    /// Open or create a SQLite-backed namespace at the given path.
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let namespace = namespace.into();
        info!("Opening SQLite blob store {:?} at {:?}", namespace, path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| SettingsError::ConnectionError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(30));

        let pool_options = SqlitePoolOptions::new().max_connections(1);
        Self::connect(namespace, options, pool_options)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn in_memory(namespace: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SettingsError::ConnectionError(e.to_string()))?;

        // The database lives as long as its only connection does.
        let pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::connect(namespace.into(), options, pool_options)
    }

    fn connect(
        namespace: String,
        options: SqliteConnectOptions,
        pool_options: SqlitePoolOptions,
    ) -> Result<Self> {
        let runtime = BlockingRuntime::new()?;
        let pool = runtime
            .block_on(pool_options.connect_with(options))
            .map_err(|e| SettingsError::ConnectionError(e.to_string()))?;

        let store = Self {
            namespace,
            pool,
            staged: Mutex::new(BTreeMap::new()),
            watcher: WatchSender::new(1024),
            runtime,
        };

        store.runtime.block_on(store.init_schema())?;
        Ok(store)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    /// The namespace this store was opened for.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of stores and erases waiting for the next flush.
    pub fn staged_len(&self) -> usize {
        self.staged.lock().len()
    }

    /// Durable keys of this namespace in lexicographic order.
    pub fn durable_keys(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = self.runtime.block_on(
            sqlx::query_as("SELECT key FROM blobs WHERE namespace = ? ORDER BY key")
                .bind(&self.namespace)
                .fetch_all(&self.pool),
        )?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM blobs WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn fetch_size(&self, key: &str) -> Result<usize> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT length(value) FROM blobs WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(0, |(len,)| len as usize))
    }

    async fn apply(&self, ops: BTreeMap<String, Option<Vec<u8>>>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = now_unix();

        for (key, op) in ops {
            match op {
                Some(value) => {
                    sqlx::query(
                        r#"
                        INSERT INTO blobs (namespace, key, value, updated_at)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(namespace, key) DO UPDATE SET
                            value = excluded.value,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(&self.namespace)
                    .bind(&key)
                    .bind(&value)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM blobs WHERE namespace = ? AND key = ?")
                        .bind(&self.namespace)
                        .bind(&key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Get current Unix timestamp.
fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

impl BlobStore for SqliteBlobStore {
    fn size(&self, key: &str) -> usize {
        if let Some(op) = self.staged.lock().get(key) {
            return op.as_ref().map_or(0, Vec::len);
        }
        match self.runtime.block_on(self.fetch_size(key)) {
            Ok(size) => size,
            Err(e) => {
                error!("error getting size of {}: {}", key, e);
                0
            }
        }
    }

    fn load(&self, key: &str, buf: &mut [u8]) -> bool {
        let staged = self.staged.lock().get(key).cloned();
        let blob = match staged {
            Some(op) => op,
            None => match self.runtime.block_on(self.fetch(key)) {
                Ok(blob) => blob,
                Err(e) => {
                    error!("error getting {}: {}", key, e);
                    return false;
                }
            },
        };

        match blob {
            Some(blob) if blob.len() == buf.len() => {
                buf.copy_from_slice(&blob);
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
        self.staged
            .lock()
            .insert(key.to_string(), Some(bytes.to_vec()));
        self.watcher.send(BlobEvent::stored(key, bytes.to_vec()));
    }

    fn erase(&self, key: &str) {
        self.staged.lock().insert(key.to_string(), None);
        self.watcher.send(BlobEvent::erased(key));
    }

    fn flush(&self) {
        let ops = std::mem::take(&mut *self.staged.lock());
        let count = ops.len();

        // On failure the staged operations are dropped, like a failed
        // commit on the medium; the next flush starts clean.
        match self.runtime.block_on(self.apply(ops)) {
            Ok(()) => {
                debug!(namespace = %self.namespace, count, "flushed staged blobs");
                self.watcher.send(BlobEvent::flushed(&self.namespace));
            }
            Err(e) => {
                error!("error committing {}: {}", self.namespace, e);
            }
        }
    }

    fn watch(&self, pattern: &str) -> Option<WatchStream> {
        Some(self.watcher.subscribe(pattern))
    }
}
