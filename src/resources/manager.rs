//! Model resource manager: load-once, shared inference resources
//!
//! Each resource key has a registered loader. The first `get` for a key runs
//! the loader on the blocking pool; every later call receives the cached
//! handle. Concurrent first calls wait on the same load. A failed load is
//! returned to the caller and not cached, so the next run retries it.

use super::embedding::{Embedder, HashingEmbedder};
use super::nli::{LexicalNliClassifier, NliClassifier};
use super::topics::TopicModel;
use crate::config::{EmbeddingBackend, ResourcesConfig};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Heavyweight resources shared across engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Embedder,
    NliClassifier,
    TopicModel,
}

impl ResourceKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKey::Embedder => "embedder",
            ResourceKey::NliClassifier => "nli-classifier",
            ResourceKey::TopicModel => "topic-model",
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, read-only access to a loaded resource.
#[derive(Clone)]
pub enum ResourceHandle {
    Embedder(Arc<dyn Embedder>),
    NliClassifier(Arc<dyn NliClassifier>),
    TopicModel(Arc<dyn TopicModel>),
}

impl ResourceHandle {
    pub fn key(&self) -> ResourceKey {
        match self {
            ResourceHandle::Embedder(_) => ResourceKey::Embedder,
            ResourceHandle::NliClassifier(_) => ResourceKey::NliClassifier,
            ResourceHandle::TopicModel(_) => ResourceKey::TopicModel,
        }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHandle({})", self.key())
    }
}

/// Errors surfaced to engines when a resource cannot be provided
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("no loader registered for resource '{0}'")]
    NotRegistered(ResourceKey),

    #[error("failed to load resource '{key}': {reason}")]
    LoadFailed { key: ResourceKey, reason: String },

    #[error("loader for '{expected}' produced a '{actual}' resource")]
    KindMismatch {
        expected: ResourceKey,
        actual: ResourceKey,
    },
}

/// Constructs a resource; may block for seconds (model download, ONNX init).
pub type ResourceLoader = Arc<dyn Fn() -> Result<ResourceHandle, ResourceError> + Send + Sync>;

/// Process-wide cache of inference resources.
///
/// Construct one at startup, share it behind an `Arc`, drop it at shutdown.
pub struct ModelResourceManager {
    loaders: HashMap<ResourceKey, ResourceLoader>,
    cache: DashMap<ResourceKey, Arc<OnceCell<ResourceHandle>>>,
}

impl Default for ModelResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResourceManager {
    /// Manager without loaders; every `get` fails until loaders are registered.
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Manager with the built-in resources selected by configuration.
    pub fn from_config(config: &ResourcesConfig) -> Self {
        let embedder: ResourceLoader = match &config.embedding {
            EmbeddingBackend::Hashing { dimension } => {
                let dimension = *dimension;
                Arc::new(move || {
                    Ok(ResourceHandle::Embedder(Arc::new(HashingEmbedder::new(dimension))))
                })
            }
            EmbeddingBackend::Fastembed => fastembed_loader(),
        };
        let topic_model = config.topic_model.clone();

        Self::new()
            .with_loader(ResourceKey::Embedder, embedder)
            .with_loader(
                ResourceKey::NliClassifier,
                Arc::new(|| {
                    Ok(ResourceHandle::NliClassifier(Arc::new(
                        LexicalNliClassifier::default(),
                    )))
                }),
            )
            .with_loader(
                ResourceKey::TopicModel,
                Arc::new(move || Ok(ResourceHandle::TopicModel(Arc::new(topic_model.clone())))),
            )
    }

    /// Register (or replace) the loader for a key.
    pub fn with_loader(mut self, key: ResourceKey, loader: ResourceLoader) -> Self {
        self.loaders.insert(key, loader);
        self.cache.remove(&key);
        self
    }

    /// Keys that have a loader.
    pub fn registered(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.loaders.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Whether the resource has been loaded successfully.
    pub fn is_loaded(&self, key: ResourceKey) -> bool {
        self.cache
            .get(&key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Get a resource, loading it on first use.
    pub async fn get(&self, key: ResourceKey) -> Result<ResourceHandle, ResourceError> {
        let loader = self
            .loaders
            .get(&key)
            .cloned()
            .ok_or(ResourceError::NotRegistered(key))?;
        let cell = self
            .cache
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let handle = cell
            .get_or_try_init(|| async move {
                let started = Instant::now();
                let loaded = tokio::task::spawn_blocking(move || (*loader)())
                    .await
                    .map_err(|e| ResourceError::LoadFailed {
                        key,
                        reason: format!("loader panicked: {}", e),
                    })
                    .and_then(|r| r);

                match &loaded {
                    Ok(_) => info!(
                        resource = %key,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "model resource loaded"
                    ),
                    Err(e) => warn!(resource = %key, error = %e, "model resource failed to load"),
                }

                let handle = loaded?;
                if handle.key() != key {
                    return Err(ResourceError::KindMismatch {
                        expected: key,
                        actual: handle.key(),
                    });
                }
                Ok(handle)
            })
            .await?;

        Ok(handle.clone())
    }

    pub async fn embedder(&self) -> Result<Arc<dyn Embedder>, ResourceError> {
        match self.get(ResourceKey::Embedder).await? {
            ResourceHandle::Embedder(e) => Ok(e),
            other => Err(ResourceError::KindMismatch {
                expected: ResourceKey::Embedder,
                actual: other.key(),
            }),
        }
    }

    pub async fn nli_classifier(&self) -> Result<Arc<dyn NliClassifier>, ResourceError> {
        match self.get(ResourceKey::NliClassifier).await? {
            ResourceHandle::NliClassifier(c) => Ok(c),
            other => Err(ResourceError::KindMismatch {
                expected: ResourceKey::NliClassifier,
                actual: other.key(),
            }),
        }
    }

    pub async fn topic_model(&self) -> Result<Arc<dyn TopicModel>, ResourceError> {
        match self.get(ResourceKey::TopicModel).await? {
            ResourceHandle::TopicModel(t) => Ok(t),
            other => Err(ResourceError::KindMismatch {
                expected: ResourceKey::TopicModel,
                actual: other.key(),
            }),
        }
    }

    /// Load the given resources ahead of the first run.
    pub async fn preload(&self, keys: &[ResourceKey]) -> Vec<(ResourceKey, Result<(), ResourceError>)> {
        let mut results = Vec::with_capacity(keys.len());
        for &key in keys {
            results.push((key, self.get(key).await.map(|_| ())));
        }
        results
    }
}

#[cfg(feature = "embeddings")]
fn fastembed_loader() -> ResourceLoader {
    Arc::new(|| {
        super::embedding::FastEmbedEmbedder::default_model()
            .map(|e| ResourceHandle::Embedder(Arc::new(e)))
            .map_err(|e| ResourceError::LoadFailed {
                key: ResourceKey::Embedder,
                reason: e.to_string(),
            })
    })
}

#[cfg(not(feature = "embeddings"))]
fn fastembed_loader() -> ResourceLoader {
    Arc::new(|| {
        Err(ResourceError::LoadFailed {
            key: ResourceKey::Embedder,
            reason: "built without the `embeddings` feature".to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::KeywordTopicModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_nli_loader(calls: Arc<AtomicUsize>) -> ResourceLoader {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResourceHandle::NliClassifier(Arc::new(LexicalNliClassifier::default())))
        })
    }

    #[tokio::test]
    async fn loads_once_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ModelResourceManager::new()
            .with_loader(ResourceKey::NliClassifier, counting_nli_loader(calls.clone()));

        assert!(!manager.is_loaded(ResourceKey::NliClassifier));
        manager.nli_classifier().await.unwrap();
        manager.nli_classifier().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.is_loaded(ResourceKey::NliClassifier));
    }

    #[tokio::test]
    async fn concurrent_first_use_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(
            ModelResourceManager::new()
                .with_loader(ResourceKey::NliClassifier, counting_nli_loader(calls.clone())),
        );

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let m = manager.clone();
            tasks.spawn(async move { m.nli_classifier().await.is_ok() });
        }
        while let Some(ok) = tasks.join_next().await {
            assert!(ok.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_reported_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let manager = ModelResourceManager::new().with_loader(
            ResourceKey::TopicModel,
            Arc::new(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ResourceError::LoadFailed {
                        key: ResourceKey::TopicModel,
                        reason: "model file missing".into(),
                    })
                } else {
                    Ok(ResourceHandle::TopicModel(Arc::new(KeywordTopicModel::default())))
                }
            }),
        );

        assert!(matches!(
            manager.topic_model().await,
            Err(ResourceError::LoadFailed { .. })
        ));
        assert!(!manager.is_loaded(ResourceKey::TopicModel));
        assert!(manager.topic_model().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregistered_and_mismatched_keys_fail() {
        let manager = ModelResourceManager::new().with_loader(
            ResourceKey::Embedder,
            Arc::new(|| Ok(ResourceHandle::TopicModel(Arc::new(KeywordTopicModel::default())))),
        );
        assert!(matches!(
            manager.nli_classifier().await,
            Err(ResourceError::NotRegistered(ResourceKey::NliClassifier))
        ));
        assert!(matches!(
            manager.embedder().await,
            Err(ResourceError::KindMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn from_config_provides_all_builtins() {
        let manager = ModelResourceManager::from_config(&ResourcesConfig::default());
        let results = manager
            .preload(&[ResourceKey::Embedder, ResourceKey::NliClassifier, ResourceKey::TopicModel])
            .await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(manager.registered().len(), 3);
    }
}
