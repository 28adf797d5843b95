//! Persisted topic-prevalence rollups used for trend comparison

use super::view::{string_id, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

string_id!(
    /// Identifier of a persisted corpus snapshot
    SnapshotId
);

impl SnapshotId {
    pub fn new() -> Self {
        Self::from_string(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

/// Topic prevalence for one user over one time window.
///
/// Prevalence values are shares of the window's documents in [0,1],
/// keyed by topic label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub id: SnapshotId,
    pub user_id: UserId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub document_count: usize,
    pub topic_prevalence: BTreeMap<String, f64>,
}

impl CorpusSnapshot {
    pub fn new(
        user_id: impl Into<UserId>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            user_id: user_id.into(),
            window_start,
            window_end,
            document_count: 0,
            topic_prevalence: BTreeMap::new(),
        }
    }

    pub fn with_document_count(mut self, count: usize) -> Self {
        self.document_count = count;
        self
    }

    pub fn with_prevalence(mut self, topic: impl Into<String>, share: f64) -> Self {
        self.topic_prevalence.insert(topic.into(), share);
        self
    }

    /// Prevalence of a topic, `None` when the topic was not tracked in this window.
    pub fn prevalence(&self, topic: &str) -> Option<f64> {
        self.topic_prevalence.get(topic).copied()
    }
}
