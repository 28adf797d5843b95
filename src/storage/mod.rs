//! Storage backends for the discovery engine
//!
//! Corpora, discoveries and snapshots are reached only through the traits in
//! [`traits`]. `SqliteStore` is the persistent backend; `InMemoryStore` backs
//! tests and ephemeral runs.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ActiveUserSource, CorpusSource, DiscoveryFilter, DiscoveryRepository, SnapshotStore,
    StorageError, StorageResult,
};
