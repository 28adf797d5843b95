//! In-memory implementation of every storage boundary

use super::traits::{
    ActiveUserSource, CorpusSource, DiscoveryFilter, DiscoveryRepository, SnapshotStore,
    StorageResult,
};
use crate::corpus::{CorpusExport, CorpusSnapshot, CorpusView, Document, Passage, UserId};
use crate::discovery::Discovery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
struct UserCorpus {
    documents: Vec<Document>,
    passages: Vec<Passage>,
    last_activity: Option<DateTime<Utc>>,
}

/// DashMap-backed store for tests and ephemeral runs. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    corpora: DashMap<UserId, UserCorpus>,
    /// Keyed by (user, dedup_key)
    discoveries: DashMap<(UserId, String), Discovery>,
    snapshots: DashMap<UserId, Vec<CorpusSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add documents and passages for a user, replacing any with the same id,
    /// and mark the user active now.
    pub fn add_documents(&self, user_id: &UserId, documents: Vec<Document>, passages: Vec<Passage>) {
        let mut corpus = self.corpora.entry(user_id.clone()).or_default();
        for doc in documents {
            match corpus.documents.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc,
                None => corpus.documents.push(doc),
            }
        }
        for passage in passages {
            match corpus.passages.iter_mut().find(|p| p.id == passage.id) {
                Some(existing) => *existing = passage,
                None => corpus.passages.push(passage),
            }
        }
        corpus.last_activity = Some(Utc::now());
    }

    pub fn import_corpus(&self, user_id: &UserId, export: CorpusExport) -> (usize, usize) {
        let counts = (export.documents.len(), export.passages.len());
        self.add_documents(user_id, export.documents, export.passages);
        counts
    }

    /// Override the recorded activity time of a user.
    pub fn set_last_activity(&self, user_id: &UserId, at: DateTime<Utc>) {
        self.corpora.entry(user_id.clone()).or_default().last_activity = Some(at);
    }

    pub fn discovery_count(&self, user_id: &UserId) -> usize {
        self.discoveries.iter().filter(|e| &e.key().0 == user_id).count()
    }
}

#[async_trait]
impl CorpusSource for InMemoryStore {
    async fn fetch_corpus(&self, user_id: &UserId) -> StorageResult<CorpusView> {
        Ok(match self.corpora.get(user_id) {
            Some(c) => CorpusView::new(user_id.clone(), c.documents.clone(), c.passages.clone()),
            None => CorpusView::empty(user_id.clone()),
        })
    }
}

#[async_trait]
impl DiscoveryRepository for InMemoryStore {
    async fn list(&self, filter: &DiscoveryFilter) -> StorageResult<Vec<Discovery>> {
        let mut found: Vec<Discovery> = self
            .discoveries
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| {
            b.confidence()
                .total_cmp(&a.confidence())
                .then_with(|| b.created_at().cmp(&a.created_at()))
        });
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn upsert(&self, discovery: &Discovery) -> StorageResult<Discovery> {
        let key = (discovery.user_id().clone(), discovery.dedup_key().to_string());
        let mut entry = self
            .discoveries
            .entry(key)
            .or_insert_with(|| discovery.clone());
        if entry.id() != discovery.id() {
            let refreshed = entry.refreshed(discovery);
            *entry = refreshed;
        }
        Ok(entry.clone())
    }

    async fn list_active_dedup_keys(&self, user_id: &UserId) -> StorageResult<HashSet<String>> {
        Ok(self
            .discoveries
            .iter()
            .filter(|e| &e.key().0 == user_id)
            .map(|e| e.key().1.clone())
            .collect())
    }
}

#[async_trait]
impl ActiveUserSource for InMemoryStore {
    async fn list_users_with_recent_activity(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<UserId>> {
        let mut users: Vec<UserId> = self
            .corpora
            .iter()
            .filter(|e| e.value().last_activity.map_or(false, |t| t >= since))
            .map(|e| e.key().clone())
            .collect();
        users.sort();
        Ok(users)
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn list_snapshots(&self, user_id: &UserId) -> StorageResult<Vec<CorpusSnapshot>> {
        let mut snapshots = self
            .snapshots
            .get(user_id)
            .map(|s| s.clone())
            .unwrap_or_default();
        snapshots.sort_by_key(|s| s.window_start);
        Ok(snapshots)
    }

    async fn save_snapshot(&self, snapshot: &CorpusSnapshot) -> StorageResult<()> {
        let mut stored = self.snapshots.entry(snapshot.user_id.clone()).or_default();
        match stored
            .iter_mut()
            .find(|s| s.window_start == snapshot.window_start)
        {
            Some(existing) => {
                let id = existing.id.clone();
                *existing = snapshot.clone();
                existing.id = id;
            }
            None => stored.push(snapshot.clone()),
        }
        Ok(())
    }
}
