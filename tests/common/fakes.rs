//! Boundary fakes that inject failures

use async_trait::async_trait;
use discovery_engine::{
    CorpusSource, CorpusView, Discovery, DiscoveryFilter, DiscoveryRepository, InMemoryStore,
    StorageError, StorageResult, UserId,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Corpus source that fails for chosen users and delegates otherwise.
pub struct FailingCorpus {
    inner: Arc<InMemoryStore>,
    failing: HashSet<UserId>,
}

impl FailingCorpus {
    pub fn new(inner: Arc<InMemoryStore>, failing: &[&str]) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|u| UserId::from(*u)).collect(),
        }
    }
}

#[async_trait]
impl CorpusSource for FailingCorpus {
    async fn fetch_corpus(&self, user_id: &UserId) -> StorageResult<CorpusView> {
        if self.failing.contains(user_id) {
            return Err(StorageError::Unavailable(format!("corpus for {} offline", user_id)));
        }
        self.inner.fetch_corpus(user_id).await
    }
}

/// Repository whose first `failures` upserts fail.
pub struct FlakyRepository {
    inner: Arc<InMemoryStore>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: Arc<InMemoryStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryRepository for FlakyRepository {
    async fn list(&self, filter: &DiscoveryFilter) -> StorageResult<Vec<Discovery>> {
        self.inner.list(filter).await
    }

    async fn upsert(&self, discovery: &Discovery) -> StorageResult<Discovery> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::Unavailable("write rejected".to_string()));
        }
        self.inner.upsert(discovery).await
    }

    async fn list_active_dedup_keys(&self, user_id: &UserId) -> StorageResult<HashSet<String>> {
        self.inner.list_active_dedup_keys(user_id).await
    }
}
