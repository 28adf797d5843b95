//! Discovery Engine: background insight generation over document corpora
//!
//! Periodically analyzes each active user's corpus and persists ranked,
//! deduplicated discoveries of six kinds: patterns, contradictions, gaps,
//! connections, trends and anomalies.
//!
//! # Core Concepts
//!
//! - **Corpus view**: read-only snapshot of one user's documents and passages,
//!   built once per run and shared by every engine
//! - **Detection engines**: independent algorithms, one per discovery type
//! - **Coordinator**: runs the engines for one user, deduplicates, ranks and persists
//! - **Scheduler**: drives coordinator runs for recently active users on a fixed cadence
//!
//! # Example
//!
//! ```
//! use discovery_engine::{DiscoveryCoordinator, EngineRegistry, InMemoryStore, ModelResourceManager};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let coordinator = DiscoveryCoordinator::with_store(
//!     store,
//!     EngineRegistry::empty(),
//!     Arc::new(ModelResourceManager::new()),
//! );
//! assert!(coordinator.registry().is_empty());
//! ```

pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod discovery;
pub mod engines;
pub mod resources;
pub mod scheduler;
pub mod storage;

pub use config::{ConfigError, DiscoveryConfig};
pub use coordinator::{CoordinatorError, DiscoveryCoordinator, EngineOutcome, RunReport};
pub use corpus::{CorpusSnapshot, CorpusView, Document, DocumentId, Passage, PassageId, UserId};
pub use discovery::{Discovery, DiscoveryCandidate, DiscoveryId, DiscoverySummary, DiscoveryType, EvidenceRef};
pub use engines::{DetectionEngine, EngineError, EngineRegistry};
pub use resources::{ModelResourceManager, ResourceError};
pub use scheduler::{CycleReport, Scheduler, SchedulerError, SchedulerHandle, SchedulerState};
pub use storage::{
    ActiveUserSource, CorpusSource, DiscoveryFilter, DiscoveryRepository, InMemoryStore,
    SnapshotStore, SqliteStore, StorageError, StorageResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
