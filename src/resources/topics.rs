//! Keyword topic model
//!
//! Fits keyword topics over a set of documents: high-scoring terms seed
//! topics, and each topic collects the terms that co-occur with its seed.
//! Used by the gap engine (coverage of reference topics) and by snapshot
//! recording (topic prevalence per window).

use crate::corpus::text;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One fitted topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    /// Seed term; stable across fits, so usable as a series key
    pub label: String,
    /// Terms with weights summing to 1, strongest first
    pub terms: Vec<(String, f64)>,
    /// Share of documents containing the seed term
    pub prevalence: f64,
    /// Indices (into the fitted input) of documents carrying the seed
    pub documents: Vec<usize>,
}

impl Topic {
    /// Weighted share of this topic's terms found in `reference`.
    pub fn overlap(&self, reference: &HashSet<String>) -> f64 {
        self.terms
            .iter()
            .filter(|(term, _)| reference.contains(term))
            .map(|(_, w)| w)
            .sum()
    }
}

/// A topic model: fit topics, then score how well they cover a reference text.
pub trait TopicModel: Send + Sync {
    fn fit(&self, documents: &[&str]) -> Vec<Topic>;

    /// Best overlap between any fitted topic and the reference text, in [0,1].
    fn coverage(&self, topics: &[Topic], reference: &str) -> f64 {
        let reference = folded_terms(reference);
        topics
            .iter()
            .map(|t| t.overlap(&reference))
            .fold(0.0, f64::max)
            .clamp(0.0, 1.0)
    }
}

/// Plural-folded content terms, the vocabulary topics are built from.
pub fn folded_terms(input: &str) -> HashSet<String> {
    text::content_terms(input).into_iter().map(|t| fold(&t)).collect()
}

fn fold(term: &str) -> String {
    if term.len() > 3 && term.ends_with('s') && !term.ends_with("ss") {
        term[..term.len() - 1].to_string()
    } else {
        term.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordTopicModel {
    pub max_topics: usize,
    pub terms_per_topic: usize,
    pub min_document_frequency: usize,
    /// Seeds whose document sets overlap an existing topic this much are merged into it
    pub max_seed_overlap: f64,
}

impl Default for KeywordTopicModel {
    fn default() -> Self {
        Self {
            max_topics: 12,
            terms_per_topic: 8,
            min_document_frequency: 2,
            max_seed_overlap: 0.8,
        }
    }
}

impl KeywordTopicModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopicModel for KeywordTopicModel {
    fn fit(&self, documents: &[&str]) -> Vec<Topic> {
        let n = documents.len();
        if n == 0 {
            return Vec::new();
        }

        let doc_terms: Vec<HashSet<String>> = documents.iter().map(|d| folded_terms(d)).collect();

        let mut postings: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, terms) in doc_terms.iter().enumerate() {
            for term in terms {
                postings.entry(term.as_str()).or_default().push(i);
            }
        }

        let idf = |df: usize| 1.0 + (n as f64 / df as f64).ln();

        let mut candidates: Vec<(&str, f64)> = postings
            .iter()
            .filter(|(_, docs)| docs.len() >= self.min_document_frequency.min(n))
            .map(|(term, docs)| (*term, docs.len() as f64 * idf(docs.len())))
            .collect();
        // Score first, then the term itself so fits are reproducible.
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut seeds: Vec<(&str, HashSet<usize>)> = Vec::new();
        for (term, _) in candidates {
            if seeds.len() >= self.max_topics {
                break;
            }
            let docs: HashSet<usize> = postings[term].iter().copied().collect();
            let absorbed = seeds.iter().any(|(_, seed_docs)| {
                let inter = docs.intersection(seed_docs).count() as f64;
                let union = docs.union(seed_docs).count() as f64;
                union > 0.0 && inter / union > self.max_seed_overlap
            });
            if !absorbed {
                seeds.push((term, docs));
            }
        }

        seeds
            .into_iter()
            .map(|(seed, docs)| {
                let size = docs.len() as f64;
                let mut co: HashMap<&str, usize> = HashMap::new();
                for &d in &docs {
                    for term in &doc_terms[d] {
                        *co.entry(term.as_str()).or_default() += 1;
                    }
                }
                let mut weighted: Vec<(String, f64)> = co
                    .into_iter()
                    .map(|(term, count)| {
                        let df = postings[term].len();
                        (term.to_string(), count as f64 / size * idf(df))
                    })
                    .collect();
                weighted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                weighted.truncate(self.terms_per_topic.max(1));
                let total: f64 = weighted.iter().map(|(_, w)| w).sum();
                if total > 0.0 {
                    weighted.iter_mut().for_each(|(_, w)| *w /= total);
                }

                let mut members: Vec<usize> = docs.into_iter().collect();
                members.sort_unstable();
                Topic {
                    label: seed.to_string(),
                    terms: weighted,
                    prevalence: size / n as f64,
                    documents: members,
                }
            })
            .collect()
    }
}
