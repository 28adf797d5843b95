//! Contradiction engine: pairwise NLI over keyword-matched passages
//!
//! An inverted keyword index proposes passage pairs that talk about the
//! same thing; the NLI classifier decides whether they disagree. Only the
//! strongest contradiction per document pair survives.

use super::traits::{require, DetectionEngine, EngineError, InsufficientData};
use crate::corpus::{text, CorpusView, DocumentId, Passage};
use crate::discovery::{
    ContradictionKind, DiscoveryCandidate, DiscoverySummary, DiscoveryType, EvidenceRef,
};
use crate::resources::{ModelResourceManager, NliClassifier, NliLabel};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContradictionConfig {
    pub enabled: bool,
    pub min_passages: usize,
    /// Minimum contradiction probability
    pub threshold: f64,
    pub min_shared_keywords: usize,
    /// Upper bound on classified pairs per run
    pub max_pairs: usize,
    /// Keywords carried by more passages than this are too common to pair on
    pub max_keyword_fanout: usize,
    pub cross_document_only: bool,
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_passages: 2,
            threshold: 0.7,
            min_shared_keywords: 2,
            max_pairs: 5000,
            max_keyword_fanout: 200,
            cross_document_only: true,
        }
    }
}

pub struct ContradictionEngine {
    config: ContradictionConfig,
}

impl ContradictionEngine {
    pub fn new(config: ContradictionConfig) -> Self {
        Self { config }
    }

    /// Passage index pairs sharing enough keywords, most shared first.
    fn candidate_pairs(&self, passages: &[Passage]) -> Vec<(usize, usize)> {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, p) in passages.iter().enumerate() {
            for term in text::content_term_set(&p.text) {
                index.entry(term).or_default().push(i);
            }
        }

        let mut shared: HashMap<(usize, usize), usize> = HashMap::new();
        for postings in index.values() {
            if postings.len() < 2 || postings.len() > self.config.max_keyword_fanout {
                continue;
            }
            for (k, &a) in postings.iter().enumerate() {
                for &b in &postings[k + 1..] {
                    if self.config.cross_document_only
                        && passages[a].document_id == passages[b].document_id
                    {
                        continue;
                    }
                    *shared.entry((a.min(b), a.max(b))).or_default() += 1;
                }
            }
        }

        let mut pairs: Vec<((usize, usize), usize)> = shared
            .into_iter()
            .filter(|(_, n)| *n >= self.config.min_shared_keywords)
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(self.config.max_pairs);
        pairs.into_iter().map(|(pair, _)| pair).collect()
    }
}

/// Contradiction probability for a pair, scored in both directions.
fn score_pair(nli: &dyn NliClassifier, a: &str, b: &str) -> Option<f64> {
    [nli.classify(a, b), nli.classify(b, a)]
        .into_iter()
        .filter(|p| p.label() == NliLabel::Contradiction)
        .map(|p| p.contradiction)
        .fold(None, |best, c| Some(best.map_or(c, |b: f64| b.max(c))))
}

#[async_trait]
impl DetectionEngine for ContradictionEngine {
    fn id(&self) -> &str {
        "contradiction"
    }

    fn discovery_type(&self) -> DiscoveryType {
        DiscoveryType::Contradiction
    }

    fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData> {
        require(self.config.min_passages, corpus.passages().len(), "passages")
    }

    async fn detect(
        &self,
        corpus: &CorpusView,
        resources: &ModelResourceManager,
    ) -> Result<Vec<DiscoveryCandidate>, EngineError> {
        if self.precondition(corpus).is_err() {
            return Ok(Vec::new());
        }
        let passages = corpus.passages();
        let pairs = self.candidate_pairs(passages);
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let nli = resources.nli_classifier().await?;

        // Best pair per unordered document pair.
        let mut best: BTreeMap<(DocumentId, DocumentId), (f64, usize, usize)> = BTreeMap::new();
        for &(a, b) in &pairs {
            let Some(confidence) = score_pair(nli.as_ref(), &passages[a].text, &passages[b].text)
            else {
                continue;
            };
            if confidence < self.config.threshold {
                continue;
            }
            let (first, second) = ordered(passages, a, b);
            let key = (
                passages[first].document_id.clone(),
                passages[second].document_id.clone(),
            );
            match best.get(&key) {
                Some((existing, _, _)) if *existing >= confidence => {}
                _ => {
                    best.insert(key, (confidence, first, second));
                }
            }
        }

        debug!(
            user_id = %corpus.user_id(),
            pairs = pairs.len(),
            contradictions = best.len(),
            "contradiction scan done"
        );

        best.into_values()
            .map(|(confidence, a, b)| {
                let (pa, pb) = (&passages[a], &passages[b]);
                let kind = classify_kind(&pa.text, &pb.text);
                DiscoveryCandidate::new(
                    confidence.clamp(0.0, 1.0),
                    vec![
                        EvidenceRef::passage(pa.document_id.clone(), pa.id.clone()),
                        EvidenceRef::passage(pb.document_id.clone(), pb.id.clone()),
                    ],
                    DiscoverySummary::Contradiction {
                        passage_a: pa.id.clone(),
                        passage_b: pb.id.clone(),
                        document_a: pa.document_id.clone(),
                        document_b: pb.document_id.clone(),
                        relation: "contradiction".to_string(),
                        kind,
                    },
                )
                .map_err(EngineError::from)
            })
            .collect()
    }
}

fn ordered(passages: &[Passage], a: usize, b: usize) -> (usize, usize) {
    let key = |i: usize| (&passages[i].document_id, &passages[i].id);
    if key(a) <= key(b) {
        (a, b)
    } else {
        (b, a)
    }
}

const TEMPORAL_MARKERS: &[&str] = &[
    "before", "after", "earlier", "later", "century", "centuries", "decade", "decades", "year",
    "years", "dated", "until", "since", "during", "era", "age", "ancient", "recent", "bc", "ad",
    "bce", "ce",
];

const DOCTRINAL_MARKERS: &[&str] = &[
    "doctrine", "doctrines", "doctrinal", "teach", "teaches", "taught", "teaching", "believe",
    "believes", "belief", "beliefs", "faith", "dogma", "church", "scripture", "scriptures",
    "theology", "theological", "sacred", "creed", "moral", "morally", "ought", "should", "must",
    "sin", "salvation", "heresy", "heretical", "orthodox", "god", "divine", "grace", "sacrament",
];

fn year_pattern() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"\b(1[0-9]{3}|20[0-9]{2})\b").expect("valid year pattern"))
}

/// Surface-feature classification of what a contradicting pair disagrees about.
///
/// Checked in order: temporal, numerical, doctrinal, falling back to factual.
pub fn classify_kind(a: &str, b: &str) -> ContradictionKind {
    let years = |s: &str| -> HashSet<String> {
        year_pattern()
            .find_iter(s)
            .map(|m| m.as_str().to_string())
            .collect()
    };
    let (years_a, years_b) = (years(a), years(b));
    let tokens_a: HashSet<String> = text::tokenize(a).into_iter().collect();
    let tokens_b: HashSet<String> = text::tokenize(b).into_iter().collect();
    let has_marker = |tokens: &HashSet<String>, markers: &[&str]| {
        markers.iter().any(|m| tokens.contains(*m))
    };

    if (!years_a.is_empty() && !years_b.is_empty() && years_a != years_b)
        || (has_marker(&tokens_a, TEMPORAL_MARKERS) && has_marker(&tokens_b, TEMPORAL_MARKERS))
    {
        return ContradictionKind::Temporal;
    }

    let numbers = |s: &str, years: &HashSet<String>| -> HashSet<String> {
        text::numbers(s)
            .into_iter()
            .filter(|n| !years.contains(n))
            .collect()
    };
    let (nums_a, nums_b) = (numbers(a, &years_a), numbers(b, &years_b));
    if !nums_a.is_empty() && !nums_b.is_empty() && nums_a != nums_b {
        return ContradictionKind::Numerical;
    }

    if has_marker(&tokens_a, DOCTRINAL_MARKERS) || has_marker(&tokens_b, DOCTRINAL_MARKERS) {
        return ContradictionKind::Doctrinal;
    }

    ContradictionKind::Factual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;
    use crate::resources::{LexicalNliClassifier, ResourceHandle, ResourceKey};
    use std::sync::Arc;

    fn resources() -> ModelResourceManager {
        ModelResourceManager::new().with_loader(
            ResourceKey::NliClassifier,
            Arc::new(|| {
                Ok(ResourceHandle::NliClassifier(Arc::new(
                    LexicalNliClassifier::default(),
                )))
            }),
        )
    }

    fn corpus(passages: &[(&str, &str, &str)]) -> CorpusView {
        let mut docs: Vec<Document> = Vec::new();
        let mut out = Vec::new();
        for (i, (doc, pid, text)) in passages.iter().enumerate() {
            if !docs.iter().any(|d| d.id.as_str() == *doc) {
                docs.push(Document::new(*doc, *doc, *text));
            }
            out.push(Passage::new(*pid, *doc, i as u32, *text));
        }
        CorpusView::new("u1", docs, out)
    }

    #[tokio::test]
    async fn contradictory_pair_is_found() {
        let view = corpus(&[
            ("d1", "p1", "The vaccine is safe for children."),
            ("d2", "p2", "The vaccine is not safe for children."),
        ]);
        let engine = ContradictionEngine::new(ContradictionConfig::default());
        let found = engine.detect(&view, &resources()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].confidence() >= 0.7);
        assert_eq!(found[0].evidence().len(), 2);
    }

    #[tokio::test]
    async fn near_identical_passages_are_not_contradictions() {
        let view = corpus(&[
            ("d1", "p1", "The vaccine is safe for children."),
            ("d2", "p2", "The vaccine is safe for young children."),
        ]);
        let engine = ContradictionEngine::new(ContradictionConfig::default());
        assert!(engine.detect(&view, &resources()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_discovery_per_document_pair() {
        let view = corpus(&[
            ("d1", "p1", "The vaccine is safe for children."),
            ("d1", "p2", "The treaty was signed in 1648 at Westphalia."),
            ("d2", "p3", "The vaccine is not safe for children."),
            ("d2", "p4", "The treaty was signed in 1658 at Westphalia."),
        ]);
        let engine = ContradictionEngine::new(ContradictionConfig::default());
        let found = engine.detect(&view, &resources()).await.unwrap();
        assert_eq!(found.len(), 1);
        // Polarity flip scores higher than the numeric clash.
        match found[0].summary() {
            DiscoverySummary::Contradiction { passage_a, passage_b, .. } => {
                assert_eq!(passage_a.as_str(), "p1");
                assert_eq!(passage_b.as_str(), "p3");
            }
            other => panic!("unexpected summary {:?}", other),
        }
    }

    #[tokio::test]
    async fn same_document_pairs_skipped_by_default() {
        let view = corpus(&[
            ("d1", "p1", "The vaccine is safe for children."),
            ("d1", "p2", "The vaccine is not safe for children."),
        ]);
        let engine = ContradictionEngine::new(ContradictionConfig::default());
        assert!(engine.detect(&view, &resources()).await.unwrap().is_empty());

        let engine = ContradictionEngine::new(ContradictionConfig {
            cross_document_only: false,
            ..Default::default()
        });
        assert_eq!(engine.detect(&view, &resources()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn too_few_passages_is_empty() {
        let view = corpus(&[("d1", "p1", "The vaccine is safe for children.")]);
        let engine = ContradictionEngine::new(ContradictionConfig::default());
        assert!(engine.precondition(&view).is_err());
        assert!(engine.detect(&view, &resources()).await.unwrap().is_empty());
    }

    #[test]
    fn kind_classification() {
        assert_eq!(
            classify_kind("The abbey was founded in 1132.", "The abbey was founded in 1150."),
            ContradictionKind::Temporal
        );
        assert_eq!(
            classify_kind("The council had 300 bishops.", "The council had 250 bishops."),
            ContradictionKind::Numerical
        );
        assert_eq!(
            classify_kind("The church teaches grace alone.", "The church does not teach grace alone."),
            ContradictionKind::Doctrinal
        );
        assert_eq!(
            classify_kind("The river is wide.", "The river is not wide."),
            ContradictionKind::Factual
        );
    }
}
