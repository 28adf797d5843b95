//! Discovery coordinator
//!
//! One run for one user: build the corpus view once, run every registered
//! engine concurrently with its own timeout, merge and deduplicate the
//! candidates, rank and truncate them, then persist. Engine failures are
//! isolated; they cost only that engine's discoveries for this run.

mod ranking;
mod report;
mod snapshots;

pub use report::{EngineOutcome, EngineReport, RunReport};
pub use snapshots::{window_bounds, SnapshotRecorder};

use crate::config::CoordinatorConfig;
use crate::corpus::{CorpusView, UserId};
use crate::discovery::{Discovery, DiscoveryCandidate};
use crate::engines::{DetectionEngine, EngineError, EngineRegistry};
use crate::resources::ModelResourceManager;
use crate::storage::{CorpusSource, DiscoveryRepository, SnapshotStore, StorageError};
use chrono::Utc;
use ranking::{dedup_batch, rank, Keyed};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to fetch corpus for user {user_id}: {source}")]
    CorpusUnavailable {
        user_id: UserId,
        #[source]
        source: StorageError,
    },

    #[error("failed to read active discoveries for user {user_id}: {source}")]
    Repository {
        user_id: UserId,
        #[source]
        source: StorageError,
    },
}

pub struct DiscoveryCoordinator {
    corpus: Arc<dyn CorpusSource>,
    repository: Arc<dyn DiscoveryRepository>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    registry: EngineRegistry,
    resources: Arc<ModelResourceManager>,
    recorder: SnapshotRecorder,
    config: CoordinatorConfig,
}

impl DiscoveryCoordinator {
    pub fn new(
        corpus: Arc<dyn CorpusSource>,
        repository: Arc<dyn DiscoveryRepository>,
        registry: EngineRegistry,
        resources: Arc<ModelResourceManager>,
    ) -> Self {
        let config = CoordinatorConfig::default();
        Self {
            corpus,
            repository,
            snapshots: None,
            registry,
            resources,
            recorder: SnapshotRecorder::new(config.snapshot_window()),
            config,
        }
    }

    /// Coordinator over a single store that serves every boundary.
    pub fn with_store<S>(store: Arc<S>, registry: EngineRegistry, resources: Arc<ModelResourceManager>) -> Self
    where
        S: CorpusSource + DiscoveryRepository + SnapshotStore + 'static,
    {
        Self::new(store.clone(), store.clone(), registry, resources).with_snapshot_store(store)
    }

    /// Snapshots feed the trend engine and receive this run's prevalence.
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.recorder = SnapshotRecorder::new(config.snapshot_window());
        self.config = config;
        self
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run discovery for one user and return the persisted discoveries,
    /// highest confidence first.
    pub async fn run(&self, user_id: &UserId) -> Result<Vec<Discovery>, CoordinatorError> {
        self.run_with_report(user_id).await.map(|(found, _)| found)
    }

    pub async fn run_with_report(
        &self,
        user_id: &UserId,
    ) -> Result<(Vec<Discovery>, RunReport), CoordinatorError> {
        let started = Instant::now();
        let mut report = RunReport::new(user_id.clone());
        info!(user_id = %user_id, engines = self.registry.len(), "discovery run started");

        let corpus = Arc::new(self.build_view(user_id).await?);

        let candidates = self.run_engines(&corpus, &mut report).await;
        report.candidates = candidates.len();

        let (entries, duplicates) = dedup_batch(candidates);
        report.duplicates = duplicates;

        let active = self
            .repository
            .list_active_dedup_keys(user_id)
            .await
            .map_err(|source| CoordinatorError::Repository {
                user_id: user_id.clone(),
                source,
            })?;

        let mut fresh: Vec<Keyed> = Vec::with_capacity(entries.len());
        for (key, candidate) in entries {
            if !active.contains(&key) {
                fresh.push((key, candidate));
            } else if self.config.refresh_existing {
                report.refreshed += 1;
                fresh.push((key, candidate));
            } else {
                report.already_known += 1;
            }
        }

        rank(&mut fresh);
        if fresh.len() > self.config.max_discoveries {
            report.truncated = fresh.len() - self.config.max_discoveries;
            fresh.truncate(self.config.max_discoveries);
        }

        let mut persisted = Vec::with_capacity(fresh.len());
        for (_, candidate) in fresh {
            match self.persist(user_id, candidate).await {
                Some(stored) => persisted.push(stored),
                None => report.dropped += 1,
            }
        }
        report.persisted = persisted.len();

        if self.config.record_snapshots {
            report.snapshot_recorded = self.record_snapshot(&corpus).await;
        }

        report.elapsed = started.elapsed();
        info!(
            user_id = %user_id,
            candidates = report.candidates,
            persisted = report.persisted,
            already_known = report.already_known,
            dropped = report.dropped,
            duration_ms = report.elapsed.as_millis() as u64,
            "discovery run finished"
        );
        Ok((persisted, report))
    }

    /// Fetch the corpus, attach snapshots and fill in missing embeddings.
    async fn build_view(&self, user_id: &UserId) -> Result<CorpusView, CoordinatorError> {
        let mut corpus = self
            .corpus
            .fetch_corpus(user_id)
            .await
            .map_err(|source| CoordinatorError::CorpusUnavailable {
                user_id: user_id.clone(),
                source,
            })?;

        if let Some(store) = &self.snapshots {
            match store.list_snapshots(user_id).await {
                Ok(snapshots) => corpus = corpus.with_snapshots(snapshots),
                Err(e) => warn!(user_id = %user_id, error = %e, "failed to load snapshots"),
            }
        }

        let needs_embedding = corpus.documents().iter().any(|d| d.embedding.is_none())
            || corpus.passages().iter().any(|p| p.embedding.is_none());
        if needs_embedding {
            match self.resources.embedder().await {
                Ok(embedder) => match corpus.ensure_embeddings(embedder.as_ref()) {
                    Ok(n) => debug!(user_id = %user_id, embedded = n, "filled missing embeddings"),
                    Err(e) => warn!(user_id = %user_id, error = %e, "embedding corpus failed"),
                },
                Err(e) => debug!(user_id = %user_id, error = %e, "no embedder; engines embed on demand"),
            }
        }

        Ok(corpus)
    }

    async fn run_engines(&self, corpus: &Arc<CorpusView>, report: &mut RunReport) -> Vec<DiscoveryCandidate> {
        let timeout = self.config.engine_timeout();
        let mut handles = Vec::new();

        for engine in self.registry.engines() {
            if let Err(why) = engine.precondition(corpus) {
                debug!(
                    user_id = %corpus.user_id(),
                    engine = engine.id(),
                    reason = %why,
                    "insufficient data, engine skipped"
                );
                report.engines.push(EngineReport {
                    engine: engine.id().to_string(),
                    discovery_type: engine.discovery_type(),
                    outcome: EngineOutcome::InsufficientData(why),
                    elapsed: std::time::Duration::ZERO,
                });
                continue;
            }

            let task_engine: Arc<dyn DetectionEngine> = Arc::clone(engine);
            let task_corpus = Arc::clone(corpus);
            let resources = Arc::clone(&self.resources);
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result = tokio::time::timeout(
                    timeout,
                    task_engine.detect(&task_corpus, &resources),
                )
                .await;
                (result, started.elapsed())
            });
            handles.push((Arc::clone(engine), handle));
        }

        let mut candidates = Vec::new();
        for (engine, handle) in handles {
            let (outcome, elapsed) = match handle.await {
                Ok((Ok(Ok(found)), elapsed)) => {
                    let n = found.len();
                    candidates.extend(found);
                    (EngineOutcome::Completed(n), elapsed)
                }
                Ok((Ok(Err(EngineError::ResourceUnavailable(e))), elapsed)) => {
                    (EngineOutcome::Unavailable(e.to_string()), elapsed)
                }
                Ok((Ok(Err(e)), elapsed)) => (EngineOutcome::Failed(e.to_string()), elapsed),
                Ok((Err(_), elapsed)) => (EngineOutcome::TimedOut, elapsed),
                Err(e) if e.is_panic() => (
                    EngineOutcome::Failed("engine panicked".to_string()),
                    std::time::Duration::ZERO,
                ),
                Err(e) => (EngineOutcome::Failed(e.to_string()), std::time::Duration::ZERO),
            };

            if outcome.is_failure() {
                warn!(
                    user_id = %corpus.user_id(),
                    engine = engine.id(),
                    outcome = %outcome,
                    "engine produced no discoveries"
                );
            } else {
                debug!(
                    user_id = %corpus.user_id(),
                    engine = engine.id(),
                    candidates = outcome.candidates(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "engine completed"
                );
            }
            report.engines.push(EngineReport {
                engine: engine.id().to_string(),
                discovery_type: engine.discovery_type(),
                outcome,
                elapsed,
            });
        }
        candidates
    }

    /// Upsert with one retry after the configured backoff.
    async fn persist(&self, user_id: &UserId, candidate: DiscoveryCandidate) -> Option<Discovery> {
        let discovery = Discovery::from_candidate(user_id.clone(), candidate);
        match self.repository.upsert(&discovery).await {
            Ok(stored) => return Some(stored),
            Err(e) => warn!(
                user_id = %user_id,
                dedup_key = discovery.dedup_key(),
                error = %e,
                "persisting discovery failed, retrying"
            ),
        }

        tokio::time::sleep(self.config.persist_backoff()).await;
        match self.repository.upsert(&discovery).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    dedup_key = discovery.dedup_key(),
                    error = %e,
                    "persisting discovery failed twice, dropped"
                );
                None
            }
        }
    }

    async fn record_snapshot(&self, corpus: &CorpusView) -> bool {
        let Some(store) = &self.snapshots else {
            return false;
        };
        let model = match self.resources.topic_model().await {
            Ok(model) => model,
            Err(e) => {
                debug!(user_id = %corpus.user_id(), error = %e, "no topic model, snapshot skipped");
                return false;
            }
        };
        let Some(snapshot) = self.recorder.snapshot(corpus, model.as_ref(), Utc::now()) else {
            return false;
        };
        match store.save_snapshot(&snapshot).await {
            Ok(()) => {
                debug!(
                    user_id = %corpus.user_id(),
                    window_start = %snapshot.window_start,
                    topics = snapshot.topic_prevalence.len(),
                    "snapshot recorded"
                );
                true
            }
            Err(e) => {
                warn!(user_id = %corpus.user_id(), error = %e, "failed to save snapshot");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;
    use crate::discovery::{DiscoverySummary, DiscoveryType, EvidenceRef};
    use crate::engines::InsufficientData;
    use crate::resources::ResourceError;
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Emits one anomaly candidate per document with a fixed confidence.
    struct FixedEngine {
        id: &'static str,
        confidence: f64,
    }

    #[async_trait]
    impl DetectionEngine for FixedEngine {
        fn id(&self) -> &str {
            self.id
        }

        fn discovery_type(&self) -> DiscoveryType {
            DiscoveryType::Anomaly
        }

        fn precondition(&self, _corpus: &CorpusView) -> Result<(), InsufficientData> {
            Ok(())
        }

        async fn detect(
            &self,
            corpus: &CorpusView,
            _resources: &ModelResourceManager,
        ) -> Result<Vec<DiscoveryCandidate>, EngineError> {
            corpus
                .documents()
                .iter()
                .map(|d| {
                    DiscoveryCandidate::new(
                        self.confidence,
                        vec![EvidenceRef::document(d.id.clone())],
                        DiscoverySummary::Anomaly {
                            document_id: d.id.clone(),
                            score: self.confidence,
                            mean_path_length: 1.0,
                        },
                    )
                    .map_err(EngineError::from)
                })
                .collect()
        }
    }

    enum Misbehave {
        Panic,
        Hang,
        Unavailable,
        Insufficient,
    }

    struct BadEngine(Misbehave);

    #[async_trait]
    impl DetectionEngine for BadEngine {
        fn id(&self) -> &str {
            match self.0 {
                Misbehave::Panic => "panics",
                Misbehave::Hang => "hangs",
                Misbehave::Unavailable => "unavailable",
                Misbehave::Insufficient => "insufficient",
            }
        }

        fn discovery_type(&self) -> DiscoveryType {
            DiscoveryType::Pattern
        }

        fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData> {
            match self.0 {
                Misbehave::Insufficient => crate::engines::require(1000, corpus.document_count(), "documents"),
                _ => Ok(()),
            }
        }

        async fn detect(
            &self,
            _corpus: &CorpusView,
            _resources: &ModelResourceManager,
        ) -> Result<Vec<DiscoveryCandidate>, EngineError> {
            match self.0 {
                Misbehave::Panic => panic!("boom"),
                Misbehave::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Misbehave::Unavailable => Err(ResourceError::NotRegistered(
                    crate::resources::ResourceKey::NliClassifier,
                )
                .into()),
                Misbehave::Insufficient => Ok(Vec::new()),
            }
        }
    }

    fn store_with_docs(user: &str, n: usize) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let docs = (0..n)
            .map(|i| Document::new(format!("d{}", i), "", "text").with_embedding(vec![1.0, 0.0]))
            .collect();
        store.add_documents(&user.into(), docs, Vec::new());
        store
    }

    fn coordinator(store: Arc<InMemoryStore>, engines: Vec<Arc<dyn DetectionEngine>>) -> DiscoveryCoordinator {
        DiscoveryCoordinator::with_store(store, EngineRegistry::new(engines), Arc::new(ModelResourceManager::new()))
            .with_config(CoordinatorConfig {
                engine_timeout_secs: 1,
                persist_backoff_ms: 1,
                ..CoordinatorConfig::default()
            })
    }

    #[tokio::test]
    async fn failing_engines_are_isolated() {
        let store = store_with_docs("u1", 3);
        let coordinator = coordinator(
            store,
            vec![
                Arc::new(BadEngine(Misbehave::Panic)),
                Arc::new(BadEngine(Misbehave::Hang)),
                Arc::new(BadEngine(Misbehave::Unavailable)),
                Arc::new(BadEngine(Misbehave::Insufficient)),
                Arc::new(FixedEngine {
                    id: "fixed",
                    confidence: 0.8,
                }),
            ],
        );

        let (found, report) = coordinator.run_with_report(&"u1".into()).await.unwrap();
        assert_eq!(found.len(), 3);
        assert!(matches!(report.outcome("panics"), Some(EngineOutcome::Failed(_))));
        assert_eq!(report.outcome("hangs"), Some(&EngineOutcome::TimedOut));
        assert!(matches!(report.outcome("unavailable"), Some(EngineOutcome::Unavailable(_))));
        assert!(matches!(
            report.outcome("insufficient"),
            Some(EngineOutcome::InsufficientData(_))
        ));
        assert_eq!(report.outcome("fixed"), Some(&EngineOutcome::Completed(3)));
        assert_eq!(report.failed_engines().len(), 3);
    }

    #[tokio::test]
    async fn second_run_persists_nothing_new() {
        let store = store_with_docs("u1", 4);
        let coordinator = coordinator(
            store.clone(),
            vec![Arc::new(FixedEngine {
                id: "fixed",
                confidence: 0.7,
            })],
        );
        assert_eq!(coordinator.run(&"u1".into()).await.unwrap().len(), 4);

        let (again, report) = coordinator.run_with_report(&"u1".into()).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(report.already_known, 4);
        assert_eq!(store.discovery_count(&"u1".into()), 4);
    }

    #[tokio::test]
    async fn refresh_rewrites_known_discoveries() {
        let store = store_with_docs("u1", 2);
        let engines: Vec<Arc<dyn DetectionEngine>> = vec![Arc::new(FixedEngine {
            id: "fixed",
            confidence: 0.7,
        })];
        let coordinator = coordinator(store.clone(), engines);
        let first = coordinator.run(&"u1".into()).await.unwrap();

        let refreshing = DiscoveryCoordinator::with_store(
            store.clone(),
            EngineRegistry::new(vec![Arc::new(FixedEngine {
                id: "fixed",
                confidence: 0.9,
            })]),
            Arc::new(ModelResourceManager::new()),
        )
        .with_config(CoordinatorConfig {
            refresh_existing: true,
            ..CoordinatorConfig::default()
        });
        let (second, report) = refreshing.run_with_report(&"u1".into()).await.unwrap();
        assert_eq!(report.refreshed, 2);
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|d| d.confidence() == 0.9));
        let first_ids: Vec<_> = first.iter().map(|d| d.id()).collect();
        assert!(second.iter().all(|d| first_ids.contains(&d.id())));
    }

    #[tokio::test]
    async fn results_are_sorted_and_truncated() {
        let store = store_with_docs("u1", 2);
        let coordinator = coordinator(
            store,
            vec![
                Arc::new(FixedEngine {
                    id: "low",
                    confidence: 0.3,
                }),
                Arc::new(FixedEngine {
                    id: "high",
                    confidence: 0.9,
                }),
            ],
        )
        .with_config(CoordinatorConfig {
            max_discoveries: 1,
            ..CoordinatorConfig::default()
        });

        let (found, report) = coordinator.run_with_report(&"u1".into()).await.unwrap();
        // Both engines flag the same documents: in-batch duplicates collapse
        // to the more confident copy.
        assert_eq!(report.candidates, 4);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.truncated, 1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence(), 0.9);
    }

    #[tokio::test]
    async fn missing_user_yields_empty_run() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(
            store,
            vec![Arc::new(FixedEngine {
                id: "fixed",
                confidence: 0.5,
            })],
        );
        let (found, report) = coordinator.run_with_report(&"ghost".into()).await.unwrap();
        assert!(found.is_empty());
        assert!(!report.snapshot_recorded);
    }
}
