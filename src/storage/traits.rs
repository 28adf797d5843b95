//! Storage boundary traits
//!
//! The engine consumes corpora and persists discoveries only through these
//! traits. Implementations must be thread-safe (Send + Sync): the scheduler
//! runs several users concurrently against the same store.

use crate::corpus::{CorpusSnapshot, CorpusView, UserId};
use crate::discovery::{Discovery, DiscoveryType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for listing discoveries
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub user_id: Option<UserId>,
    pub discovery_type: Option<DiscoveryType>,
    pub min_confidence: Option<f64>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl DiscoveryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, discovery_type: DiscoveryType) -> Self {
        self.discovery_type = Some(discovery_type);
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a discovery passes every criterion except `limit`.
    pub fn matches(&self, discovery: &Discovery) -> bool {
        self.user_id.as_ref().map_or(true, |u| discovery.user_id() == u)
            && self
                .discovery_type
                .map_or(true, |t| discovery.discovery_type() == t)
            && self
                .min_confidence
                .map_or(true, |m| discovery.confidence() >= m)
    }
}

/// Source of per-user corpora. Snapshots are attached separately.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    async fn fetch_corpus(&self, user_id: &UserId) -> StorageResult<CorpusView>;
}

/// Persistence boundary for discoveries.
#[async_trait]
pub trait DiscoveryRepository: Send + Sync {
    /// Discoveries matching the filter, highest confidence first.
    async fn list(&self, filter: &DiscoveryFilter) -> StorageResult<Vec<Discovery>>;

    /// Insert, or refresh the record with the same `(user_id, dedup_key)`.
    ///
    /// Returns the stored record; on refresh it keeps the existing id.
    async fn upsert(&self, discovery: &Discovery) -> StorageResult<Discovery>;

    async fn list_active_dedup_keys(&self, user_id: &UserId) -> StorageResult<HashSet<String>>;
}

/// Enumerates users whose corpus changed recently.
#[async_trait]
pub trait ActiveUserSource: Send + Sync {
    async fn list_users_with_recent_activity(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<UserId>>;
}

/// Persisted topic-prevalence snapshots, one per `(user_id, window_start)`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Snapshots for a user in chronological order.
    async fn list_snapshots(&self, user_id: &UserId) -> StorageResult<Vec<CorpusSnapshot>>;

    /// Insert, or replace the statistics of the same window (keeping its id).
    async fn save_snapshot(&self, snapshot: &CorpusSnapshot) -> StorageResult<()>;
}
