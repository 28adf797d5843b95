//! Gap engine: reference topics the corpus barely covers

use super::traits::{require, DetectionEngine, EngineError, InsufficientData};
use crate::config::Taxonomy;
use crate::corpus::{CorpusView, Document};
use crate::discovery::{DiscoveryCandidate, DiscoverySummary, DiscoveryType, EvidenceRef};
use crate::resources::{folded_terms, ModelResourceManager};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    pub enabled: bool,
    pub min_corpus_size: usize,
    /// Reference topics with best coverage below this are gaps
    pub weak_coverage: f64,
    /// Related documents cited as evidence per gap
    pub evidence_documents: usize,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_corpus_size: 5,
            weak_coverage: 0.2,
            evidence_documents: 3,
        }
    }
}

pub struct GapEngine {
    config: GapConfig,
    taxonomy: Taxonomy,
}

impl GapEngine {
    pub fn new(config: GapConfig, taxonomy: Taxonomy) -> Self {
        Self { config, taxonomy }
    }

    /// Documents sharing terms with the reference, best overlap first.
    ///
    /// With no overlap at all, the single document with the smallest id.
    fn related_documents<'a>(
        documents: &'a [Document],
        doc_terms: &[HashSet<String>],
        reference: &HashSet<String>,
        k: usize,
    ) -> Vec<&'a Document> {
        let mut ranked: Vec<(&Document, usize)> = documents
            .iter()
            .zip(doc_terms)
            .map(|(doc, terms)| (doc, terms.intersection(reference).count()))
            .filter(|(_, overlap)| *overlap > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        if ranked.is_empty() {
            return documents.iter().min_by(|a, b| a.id.cmp(&b.id)).into_iter().collect();
        }
        ranked.into_iter().take(k.max(1)).map(|(doc, _)| doc).collect()
    }
}

#[async_trait]
impl DetectionEngine for GapEngine {
    fn id(&self) -> &str {
        "gap"
    }

    fn discovery_type(&self) -> DiscoveryType {
        DiscoveryType::Gap
    }

    fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData> {
        require(self.config.min_corpus_size, corpus.document_count(), "documents")
    }

    async fn detect(
        &self,
        corpus: &CorpusView,
        resources: &ModelResourceManager,
    ) -> Result<Vec<DiscoveryCandidate>, EngineError> {
        if self.precondition(corpus).is_err() {
            return Ok(Vec::new());
        }
        if self.taxonomy.is_empty() {
            debug!(user_id = %corpus.user_id(), "no reference taxonomy configured");
            return Ok(Vec::new());
        }

        let model = resources.topic_model().await?;
        let texts: Vec<String> = corpus.documents().iter().map(|d| d.full_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let topics = model.fit(&refs);
        let doc_terms: Vec<HashSet<String>> = texts.iter().map(|t| folded_terms(t)).collect();

        let mut candidates = Vec::new();
        for (label, description) in self.taxonomy.iter() {
            let reference = format!("{} {}", label, description);
            let coverage = model.coverage(&topics, &reference);
            if coverage >= self.config.weak_coverage {
                continue;
            }

            let related = Self::related_documents(
                corpus.documents(),
                &doc_terms,
                &folded_terms(&reference),
                self.config.evidence_documents,
            );
            let mut evidence = vec![EvidenceRef::topic(label)];
            evidence.extend(
                related
                    .into_iter()
                    .map(|doc| EvidenceRef::document(doc.id.clone())),
            );

            candidates.push(DiscoveryCandidate::new(
                (1.0 - coverage).clamp(0.0, 1.0),
                evidence,
                DiscoverySummary::Gap {
                    topic: label.to_string(),
                    description: description.to_string(),
                    coverage,
                },
            )?);
        }

        debug!(
            user_id = %corpus.user_id(),
            topics = topics.len(),
            reference_topics = self.taxonomy.len(),
            gaps = candidates.len(),
            "gap analysis done"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{KeywordTopicModel, ResourceHandle, ResourceKey};
    use std::sync::Arc;

    fn resources() -> ModelResourceManager {
        ModelResourceManager::new().with_loader(
            ResourceKey::TopicModel,
            Arc::new(|| Ok(ResourceHandle::TopicModel(Arc::new(KeywordTopicModel::default())))),
        )
    }

    fn corpus() -> CorpusView {
        let texts = [
            "Telescopes reveal distant stars and planets",
            "Planets orbit stars; telescopes track orbits",
            "Stars form in nebulae observed by telescopes",
            "Flowers need pollinators; plants grow leaves",
            "Plants convert light in leaves; flowers bloom",
            "Leaves fall from plants in autumn",
        ];
        let docs = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Document::new(format!("d{}", i), "", *t))
            .collect();
        CorpusView::new("u1", docs, Vec::new())
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::new()
            .with_topic("astronomy", "stars, planets and telescopes")
            .with_topic("ethics", "morality, virtue and duty")
    }

    #[tokio::test]
    async fn missing_topic_becomes_gap() {
        let engine = GapEngine::new(GapConfig::default(), taxonomy());
        let found = engine.detect(&corpus(), &resources()).await.unwrap();
        assert_eq!(found.len(), 1);
        match found[0].summary() {
            DiscoverySummary::Gap { topic, coverage, .. } => {
                assert_eq!(topic, "ethics");
                assert_eq!(*coverage, 0.0);
            }
            other => panic!("unexpected summary {:?}", other),
        }
        assert_eq!(found[0].confidence(), 1.0);
        assert!(found[0].evidence().iter().any(|e| e.document_id().is_some()));
    }

    #[tokio::test]
    async fn gaps_for_distinct_topics_do_not_share_keys() {
        let taxonomy = taxonomy().with_topic("economics", "markets, prices and trade");
        let engine = GapEngine::new(GapConfig::default(), taxonomy);
        let found = engine.detect(&corpus(), &resources()).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_ne!(found[0].dedup_key(), found[1].dedup_key());
    }

    #[tokio::test]
    async fn empty_taxonomy_or_small_corpus_is_empty() {
        let engine = GapEngine::new(GapConfig::default(), Taxonomy::new());
        assert!(engine.detect(&corpus(), &resources()).await.unwrap().is_empty());

        let small = CorpusView::new("u1", vec![Document::new("d", "", "stars")], Vec::new());
        let engine = GapEngine::new(GapConfig::default(), taxonomy());
        assert!(engine.precondition(&small).is_err());
        assert!(engine.detect(&small, &resources()).await.unwrap().is_empty());
    }

    #[test]
    fn evidence_prefers_overlapping_documents() {
        let view = corpus();
        let doc_terms: Vec<HashSet<String>> = view
            .documents()
            .iter()
            .map(|d| folded_terms(&d.full_text()))
            .collect();
        let reference = folded_terms("flowers and leaves");
        let related = GapEngine::related_documents(view.documents(), &doc_terms, &reference, 5);
        let ids: Vec<&str> = related.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d4", "d5"]);
    }

    #[tokio::test]
    async fn unrelated_gap_cites_one_document_regardless_of_order() {
        let engine = GapEngine::new(GapConfig::default(), taxonomy());
        let forward = engine.detect(&corpus(), &resources()).await.unwrap();

        let mut docs = corpus().documents().to_vec();
        docs.reverse();
        let reversed = CorpusView::new("u1", docs, Vec::new());
        let backward = engine.detect(&reversed, &resources()).await.unwrap();

        let cited: Vec<_> = forward[0]
            .evidence()
            .iter()
            .filter_map(|e| e.document_id())
            .collect();
        assert_eq!(cited.len(), 1);
        assert_eq!(cited[0].as_str(), "d0");
        assert_eq!(forward[0].dedup_key(), backward[0].dedup_key());
    }
}
