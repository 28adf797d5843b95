//! Anomaly engine: isolation-forest outlier scoring over document embeddings
//!
//! Outliers are isolated by fewer random axis-aligned splits than typical
//! points. The anomaly score is s(x) = 2^(-E[h(x)] / c(psi)), where c is the
//! average path length of an unsuccessful BST search over psi samples.

use super::document_vectors;
use super::traits::{require, DetectionEngine, EngineError, InsufficientData};
use crate::corpus::CorpusView;
use crate::discovery::{DiscoveryCandidate, DiscoverySummary, DiscoveryType, EvidenceRef};
use crate::resources::ModelResourceManager;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub enabled: bool,
    pub min_corpus_size: usize,
    pub trees: usize,
    /// Subsample size per tree (psi)
    pub sample_size: usize,
    /// Minimum anomaly score reported
    pub threshold: f64,
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_corpus_size: 10,
            trees: 100,
            sample_size: 256,
            threshold: 0.62,
            seed: 42,
        }
    }
}

/// Average path length of an unsuccessful search in a BST of `n` nodes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn coord(point: &[f32], dim: usize) -> f32 {
    point.get(dim).copied().unwrap_or(0.0)
}

#[derive(Debug, Clone)]
enum Node {
    Leaf { size: usize },
    Split { dim: usize, value: f32, left: usize, right: usize },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(points: &[&[f32]], sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut nodes = Vec::new();
        Self::grow_node(points, sample, 0, height_limit, rng, &mut nodes);
        Self { nodes }
    }

    fn grow_node(
        points: &[&[f32]],
        idx: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
        nodes: &mut Vec<Node>,
    ) -> usize {
        let slot = nodes.len();
        nodes.push(Node::Leaf { size: idx.len() });
        if depth >= height_limit || idx.len() <= 1 {
            return slot;
        }

        let dims = idx.iter().map(|&i| points[i].len()).max().unwrap_or(0);
        let splittable: Vec<(usize, f32, f32)> = (0..dims)
            .filter_map(|d| {
                let (lo, hi) = idx.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &i| {
                    let x = coord(points[i], d);
                    (lo.min(x), hi.max(x))
                });
                (lo < hi).then_some((d, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return slot;
        }

        let (dim, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let value = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            idx.into_iter().partition(|&i| coord(points[i], dim) < value);

        let left = Self::grow_node(points, left, depth + 1, height_limit, rng, nodes);
        let right = Self::grow_node(points, right, depth + 1, height_limit, rng, nodes);
        nodes[slot] = Node::Split {
            dim,
            value,
            left,
            right,
        };
        slot
    }

    fn path_length(&self, point: &[f32]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    node = if coord(point, *dim) < *value { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// A fitted isolation forest. Same points, parameters and seed give the same forest.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    pub fn fit(points: &[&[f32]], trees: usize, sample_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let psi = sample_size.min(points.len());
        let height_limit = (psi.max(2) as f64).log2().ceil() as usize;
        let trees = (0..trees)
            .map(|_| {
                let sample = rand::seq::index::sample(&mut rng, points.len(), psi).into_vec();
                IsolationTree::grow(points, sample, height_limit, &mut rng)
            })
            .collect();
        Self {
            trees,
            sample_size: psi,
        }
    }

    /// Mean path length E[h(x)] across trees.
    pub fn mean_path_length(&self, point: &[f32]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.path_length(point)).sum::<f64>() / self.trees.len() as f64
    }

    /// Normalized anomaly score in (0, 1]; about 0.5 for typical points.
    pub fn score(&self, point: &[f32]) -> f64 {
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-self.mean_path_length(point) / c)
    }
}

pub struct AnomalyEngine {
    config: AnomalyConfig,
}

impl AnomalyEngine {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DetectionEngine for AnomalyEngine {
    fn id(&self) -> &str {
        "anomaly"
    }

    fn discovery_type(&self) -> DiscoveryType {
        DiscoveryType::Anomaly
    }

    fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData> {
        require(
            self.config.min_corpus_size.max(2),
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
        let forest = IsolationForest::fit(
            &vectors,
            self.config.trees,
            self.config.sample_size,
            self.config.seed,
        );

        let mut candidates = Vec::new();
        for ((id, _), vector) in points.iter().zip(&vectors) {
            let score = forest.score(vector);
            if score < self.config.threshold {
                continue;
            }
            candidates.push(DiscoveryCandidate::new(
                score.clamp(0.0, 1.0),
                vec![EvidenceRef::document((*id).clone())],
                DiscoverySummary::Anomaly {
                    document_id: (*id).clone(),
                    score,
                    mean_path_length: forest.mean_path_length(vector),
                },
            )?);
        }

        debug!(
            user_id = %corpus.user_id(),
            documents = vectors.len(),
            anomalies = candidates.len(),
            "anomaly scoring done"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;

    fn cluster_with_outlier() -> CorpusView {
        let mut docs: Vec<Document> = (0..30)
            .map(|i| {
                let v = vec![
                    1.0 + 0.01 * (i % 5) as f32,
                    0.5 + 0.01 * (i % 7) as f32,
                    0.2 + 0.01 * (i % 3) as f32,
                    0.0,
                ];
                Document::new(format!("d{:02}", i), "", "typical").with_embedding(v)
            })
            .collect();
        docs.push(Document::new("odd", "", "unusual").with_embedding(vec![-3.0, 4.0, -5.0, 6.0]));
        CorpusView::new("u1", docs, Vec::new())
    }

    #[tokio::test]
    async fn outlier_is_flagged_first() {
        let engine = AnomalyEngine::new(AnomalyConfig::default());
        let mut found = engine
            .detect(&cluster_with_outlier(), &ModelResourceManager::new())
            .await
            .unwrap();
        assert!(!found.is_empty());
        found.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        match found[0].summary() {
            DiscoverySummary::Anomaly { document_id, .. } => assert_eq!(document_id.as_str(), "odd"),
            other => panic!("unexpected summary {:?}", other),
        }
        assert!(found[0].confidence() >= 0.62);
    }

    #[test]
    fn same_seed_same_scores() {
        let view = cluster_with_outlier();
        let points: Vec<&[f32]> = view
            .documents()
            .iter()
            .filter_map(|d| d.embedding.as_deref())
            .collect();
        let a = IsolationForest::fit(&points, 50, 16, 7);
        let b = IsolationForest::fit(&points, 50, 16, 7);
        for p in &points {
            assert_eq!(a.score(p), b.score(p));
        }
    }

    #[test]
    fn identical_points_score_one_half() {
        let p = [1.0f32, 2.0];
        let points: Vec<&[f32]> = (0..12).map(|_| &p[..]).collect();
        let forest = IsolationForest::fit(&points, 10, 8, 1);
        assert!((forest.score(&p) - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn small_corpus_is_empty() {
        let docs = (0..3)
            .map(|i| Document::new(format!("d{}", i), "", "x").with_embedding(vec![i as f32]))
            .collect();
        let corpus = CorpusView::new("u1", docs, Vec::new());
        let engine = AnomalyEngine::new(AnomalyConfig::default());
        assert!(engine.precondition(&corpus).is_err());
        assert!(engine
            .detect(&corpus, &ModelResourceManager::new())
            .await
            .unwrap()
            .is_empty());
    }
}
