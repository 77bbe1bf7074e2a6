//! # reactive-settings
//!
//! Reactive, batch-persisted settings for embedded devices.
//!
//! A setting is a [`DataItem`]: one typed value with change subscribers,
//! an optional mutation policy and a persistence policy. Persisted items
//! never write on change. They register a pending write with a
//! [`CommitBatcher`], and an explicit commit writes each changed key once
//! and flushes the blob store a single time, sparing the flash.
//!
//! - **Change notification**: subscribers see the new value before it
//!   replaces the old one
//! - **Mutation policies**: [`Always`], [`Different`], [`Bounded`]
//! - **Persistence policies**: in memory, scalar blob or vector blob
//! - **Deferred commits**: many logical writes, one physical write per key
//! - **Models**: named trees of items with bulk reset, default and render
//!
//! ## Backends
//!
//! - [`MemoryBlobStore`]: In-memory store modelling flash (testing and
//!   development)
//! - [`SqliteBlobStore`]: Embedded SQLite database
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reactive_settings::{Factory, MemoryBlobStore};
//!
//! fn main() -> reactive_settings::Result<()> {
//!     let store = Arc::new(MemoryBlobStore::new());
//!     let factory = Factory::new(store);
//!
//!     let volume = factory.set_bounded(5u8, 0, 11, Some("volume"), None)?;
//!     volume.subscribe(|v| println!("volume is now {}", v), false);
//!
//!     volume.set(7);
//!     volume.set(8);
//!
//!     // One write of 8 under "volume"
//!     factory.commit();
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration and background commits
//!
//! ```rust,no_run
//! use reactive_settings::{Factory, SettingsConfig};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> reactive_settings::Result<()> {
//!     let config = SettingsConfig::from_json_str(r#"{
//!         "backend": { "type": "sqlite", "path": "settings.db" },
//!         "commit_interval_ms": 5000
//!     }"#)?;
//!     let factory = Factory::from_config(&config)?;
//!
//!     let (shutdown, rx) = watch::channel(false);
//!     let committer = factory.spawn_periodic_commit(rx);
//!
//!     let brightness = factory.set_different(50u32, Some("brightness"), None)?;
//!     brightness.set(80);
//!
//!     shutdown.send(true).ok();
//!     if let Some(task) = committer {
//!         task.await.ok();
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod commit;
pub mod config;
pub mod error;
pub mod factory;
pub mod item;
pub mod memory;
pub mod model;
pub mod mutation;
pub mod notify;
pub mod persist;
pub mod sqlite;
pub mod store;
pub mod watch;

// Re-export main types
pub use codec::BlobValue;
pub use commit::{run_periodic_commit, CommitBatcher, CommitStats};
pub use config::{BackendConfig, SettingsConfig};
pub use error::{Result, SettingsError};
pub use factory::Factory;
pub use item::{DataItem, Value};
pub use memory::MemoryBlobStore;
pub use model::{DataNode, Model};
pub use mutation::{Always, Bounded, Different, MutationPolicy};
pub use notify::SubscriptionId;
pub use persist::{NoStorage, NoVectorStorage, Persisted, PersistedVector, Storage};
pub use sqlite::SqliteBlobStore;
pub use store::{validate_key, BlobStore, MAX_KEY_LENGTH};
pub use watch::{BlobEvent, BlobEventKind, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::commit::CommitBatcher;
    pub use crate::error::{Result, SettingsError};
    pub use crate::factory::Factory;
    pub use crate::item::DataItem;
    pub use crate::memory::MemoryBlobStore;
    pub use crate::model::{DataNode, Model};
    pub use crate::mutation::{Always, Bounded, Different};
    pub use crate::sqlite::SqliteBlobStore;
    pub use crate::store::BlobStore;
}
