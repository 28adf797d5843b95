//! Pattern engine: density clustering of document embeddings
//!
//! DBSCAN over cosine distance. Each dense cluster becomes one pattern;
//! noise points are ignored.

use super::traits::{require, DetectionEngine, EngineError, InsufficientData};
use super::document_vectors;
use crate::corpus::{text, CorpusView, DocumentId};
use crate::discovery::{DiscoveryCandidate, DiscoverySummary, DiscoveryType, EvidenceRef};
use crate::resources::{cosine_similarity, ModelResourceManager};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub enabled: bool,
    pub min_corpus_size: usize,
    /// Maximum cosine distance between neighbors
    pub eps: f32,
    /// Neighborhood size (self included) that makes a point a core point
    pub min_samples: usize,
    pub key_terms: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_corpus_size: 5,
            eps: 0.25,
            min_samples: 3,
            key_terms: 5,
        }
    }
}

pub struct PatternEngine {
    config: PatternConfig,
}

impl PatternEngine {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    fn key_terms(&self, corpus: &CorpusView, members: &[&DocumentId]) -> Vec<String> {
        let mut df: HashMap<String, usize> = HashMap::new();
        for id in members {
            if let Some(doc) = corpus.document(id) {
                for term in text::content_term_set(&doc.full_text()) {
                    *df.entry(term).or_default() += 1;
                }
            }
        }
        let floor = (members.len() / 2).max(2);
        let mut shared: Vec<(String, usize)> =
            df.into_iter().filter(|(_, n)| *n >= floor).collect();
        shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        shared
            .into_iter()
            .take(self.config.key_terms)
            .map(|(t, _)| t)
            .collect()
    }
}

#[async_trait]
impl DetectionEngine for PatternEngine {
    fn id(&self) -> &str {
        "pattern"
    }

    fn discovery_type(&self) -> DiscoveryType {
        DiscoveryType::Pattern
    }

    fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData> {
        require(
            self.config.min_corpus_size.max(self.config.min_samples),
            corpus.document_count(),
            "documents",
        )
    }

    async fn detect(
        &self,
        corpus: &CorpusView,
        resources: &ModelResourceManager,
    ) -> Result<Vec<DiscoveryCandidate>, EngineError> {
        if self.precondition(corpus).is_err() {
            return Ok(Vec::new());
        }

        let points = document_vectors(corpus, resources).await?;
        let vectors: Vec<&[f32]> = points.iter().map(|(_, v)| v.as_slice()).collect();
        let labels = dbscan(&vectors, self.config.eps, self.config.min_samples);

        let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            if let Some(c) = label {
                clusters.entry(*c).or_default().push(i);
            }
        }

        let mut candidates = Vec::new();
        for members in clusters.values() {
            if members.len() < self.config.min_samples {
                continue;
            }
            let cohesion = mean_pairwise_similarity(members, &vectors);
            let mut ids: Vec<&DocumentId> = members.iter().map(|&i| points[i].0).collect();
            ids.sort();

            let key_terms = self.key_terms(corpus, &ids);
            let evidence = ids.iter().map(|id| EvidenceRef::document((*id).clone())).collect();
            candidates.push(DiscoveryCandidate::new(
                cohesion,
                evidence,
                DiscoverySummary::Pattern {
                    size: ids.len(),
                    cohesion,
                    key_terms,
                },
            )?);
        }

        debug!(
            user_id = %corpus.user_id(),
            clusters = candidates.len(),
            noise = labels.iter().filter(|l| l.is_none()).count(),
            "pattern clustering done"
        );
        Ok(candidates)
    }
}

fn mean_pairwise_similarity(members: &[usize], vectors: &[&[f32]]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (k, &i) in members.iter().enumerate() {
        for &j in &members[k + 1..] {
            total += cosine_similarity(vectors[i], vectors[j]) as f64;
            pairs += 1;
        }
    }
    if pairs == 0 {
        return 0.0;
    }
    (total / pairs as f64).clamp(0.0, 1.0)
}

/// DBSCAN with cosine distance. Returns a cluster index per point, `None` for noise.
///
/// Neighborhoods include the point itself. Border points take the first
/// cluster that reaches them.
pub fn dbscan(points: &[&[f32]], eps: f32, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| i == j || 1.0 - cosine_similarity(points[i], points[j]) <= eps)
                .collect()
        })
        .collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut cluster = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        if neighbors[i].len() < min_samples {
            continue;
        }

        labels[i] = Some(cluster);
        let mut queue: VecDeque<usize> = neighbors[i].iter().copied().collect();
        while let Some(j) = queue.pop_front() {
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            if neighbors[j].len() >= min_samples {
                queue.extend(neighbors[j].iter().copied());
            }
        }
        cluster += 1;
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;
    use crate::resources::HashingEmbedder;
    use crate::resources::{ResourceHandle, ResourceKey};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn resources() -> ModelResourceManager {
        ModelResourceManager::new().with_loader(
            ResourceKey::Embedder,
            Arc::new(|| Ok(ResourceHandle::Embedder(Arc::new(HashingEmbedder::new(64))))),
        )
    }

    fn doc(id: &str, text: &str, v: [f32; 4]) -> Document {
        Document::new(id, id, text).with_embedding(v.to_vec())
    }

    fn three_groups() -> CorpusView {
        let mut docs = Vec::new();
        for i in 0..4 {
            let d = i as f32 * 0.03;
            docs.push(doc(&format!("a{}", i), "orbit telescope stars", [1.0, d, 0.0, 0.0]));
            docs.push(doc(&format!("b{}", i), "leaves flowers plants", [0.0, 1.0, d, 0.0]));
            docs.push(doc(&format!("c{}", i), "council doctrine creed", [0.0, 0.0, 1.0, d]));
        }
        docs.push(doc("noise", "something else entirely", [0.5, 0.5, 0.5, 0.5]));
        CorpusView::new("u1", docs, Vec::new())
    }

    #[tokio::test]
    async fn three_separated_groups_give_three_patterns() {
        let engine = PatternEngine::new(PatternConfig::default());
        let found = engine.detect(&three_groups(), &resources()).await.unwrap();
        assert_eq!(found.len(), 3);

        let groups: BTreeSet<BTreeSet<String>> = found
            .iter()
            .map(|c| {
                c.evidence()
                    .iter()
                    .filter_map(|e| e.document_id().map(|d| d.to_string()))
                    .collect()
            })
            .collect();
        for prefix in ["a", "b", "c"] {
            let expected: BTreeSet<String> = (0..4).map(|i| format!("{}{}", prefix, i)).collect();
            assert!(groups.contains(&expected), "missing group {}", prefix);
        }
        for c in &found {
            assert!(c.confidence() > 0.9);
            assert_eq!(c.discovery_type(), DiscoveryType::Pattern);
        }
    }

    #[tokio::test]
    async fn key_terms_come_from_members() {
        let engine = PatternEngine::new(PatternConfig::default());
        let found = engine.detect(&three_groups(), &resources()).await.unwrap();
        let all_terms: Vec<String> = found
            .iter()
            .flat_map(|c| match c.summary() {
                DiscoverySummary::Pattern { key_terms, .. } => key_terms.clone(),
                _ => Vec::new(),
            })
            .collect();
        assert!(all_terms.contains(&"telescope".to_string()));
        assert!(all_terms.contains(&"doctrine".to_string()));
    }

    #[tokio::test]
    async fn small_corpus_is_empty() {
        let docs = vec![doc("a", "x", [1.0, 0.0, 0.0, 0.0]), doc("b", "y", [1.0, 0.0, 0.0, 0.0])];
        let corpus = CorpusView::new("u1", docs, Vec::new());
        let engine = PatternEngine::new(PatternConfig::default());
        assert!(engine.precondition(&corpus).is_err());
        assert!(engine.detect(&corpus, &resources()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scattered_points_form_no_cluster() {
        let docs: Vec<Document> = (0..5)
            .map(|i| {
                let mut v = [0.0f32; 4];
                v[i % 4] = 1.0;
                if i == 4 {
                    v = [-1.0, 0.0, 0.0, 0.0];
                }
                doc(&format!("d{}", i), "text", v)
            })
            .collect();
        let corpus = CorpusView::new("u1", docs, Vec::new());
        let engine = PatternEngine::new(PatternConfig::default());
        assert!(engine.detect(&corpus, &resources()).await.unwrap().is_empty());
    }

    #[test]
    fn dbscan_marks_noise() {
        let a = [1.0f32, 0.0];
        let b = [0.99f32, 0.01];
        let c = [0.98f32, 0.02];
        let far = [0.0f32, 1.0];
        let labels = dbscan(&[&a, &b, &c, &far], 0.1, 3);
        assert_eq!(labels, vec![Some(0), Some(0), Some(0), None]);
    }
}
