//! Connection engine: documents that bridge otherwise separate regions
//!
//! Documents are linked when they share references (explicit, or cited in
//! the text). A bridge is an articulation point of that graph whose removal
//! leaves at least two regions of meaningful size.

use super::traits::{require, DetectionEngine, EngineError, InsufficientData};
use crate::corpus::{CorpusView, Document, DocumentId};
use crate::discovery::{DiscoveryCandidate, DiscoverySummary, DiscoveryType, EvidenceRef};
use crate::resources::ModelResourceManager;
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub enabled: bool,
    pub min_corpus_size: usize,
    /// Shared references needed for an edge
    pub min_shared_references: usize,
    pub min_region_size: usize,
    /// Also mine DOIs, URLs and bracketed author-year citations from text
    pub extract_citations: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_corpus_size: 5,
            min_shared_references: 1,
            min_region_size: 2,
            extract_citations: true,
        }
    }
}

pub struct ConnectionEngine {
    config: ConnectionConfig,
}

struct CitationPatterns {
    doi: Regex,
    url: Regex,
    bracketed: Regex,
}

fn citation_patterns() -> &'static CitationPatterns {
    static PATTERNS: OnceLock<CitationPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CitationPatterns {
        doi: Regex::new(r"\b10\.[0-9]{4,9}/[^\s\]\)>,;]+").expect("valid DOI pattern"),
        url: Regex::new(r"https?://[^\s\]\)>,;]+").expect("valid URL pattern"),
        bracketed: Regex::new(r"\[([A-Z][A-Za-z'\-]+(?: et al\.?)?,? [0-9]{4}[a-z]?)\]")
            .expect("valid citation pattern"),
    })
}

fn normalize_reference(raw: &str) -> Option<String> {
    let mut r = raw.trim().to_lowercase();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"] {
        if let Some(rest) = r.strip_prefix(prefix) {
            r = rest.to_string();
        }
    }
    let r = r.trim_end_matches(|c: char| c == '.' || c == '/').to_string();
    (!r.is_empty()).then_some(r)
}

/// Normalized references of a document: explicit ones, plus citations mined
/// from its text when `extract_citations` is set.
pub fn extract_references(document: &Document, extract_citations: bool) -> BTreeSet<String> {
    let mut refs: BTreeSet<String> = document
        .references
        .iter()
        .filter_map(|r| normalize_reference(r))
        .collect();

    if extract_citations {
        let patterns = citation_patterns();
        let text = document.full_text();
        for m in patterns.url.find_iter(&text) {
            refs.extend(normalize_reference(m.as_str()));
        }
        for m in patterns.doi.find_iter(&text) {
            refs.extend(normalize_reference(m.as_str()));
        }
        for caps in patterns.bracketed.captures_iter(&text) {
            if let Some(c) = caps.get(1) {
                let cite: String = c
                    .as_str()
                    .replace(',', "")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                refs.insert(format!("cite:{}", cite));
            }
        }
    }
    refs
}

/// Undirected weighted graph over corpus document indices.
struct ReferenceGraph {
    adjacency: Vec<Vec<usize>>,
    weights: HashMap<(usize, usize), usize>,
}

impl ReferenceGraph {
    fn build(corpus: &CorpusView, config: &ConnectionConfig) -> Self {
        let n = corpus.document_count();
        let mut cited_by: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, doc) in corpus.documents().iter().enumerate() {
            for r in extract_references(doc, config.extract_citations) {
                cited_by.entry(r).or_default().push(i);
            }
        }

        let mut shared: HashMap<(usize, usize), usize> = HashMap::new();
        for docs in cited_by.values() {
            for (k, &a) in docs.iter().enumerate() {
                for &b in &docs[k + 1..] {
                    *shared.entry((a.min(b), a.max(b))).or_default() += 1;
                }
            }
        }
        shared.retain(|_, w| *w >= config.min_shared_references);

        let mut adjacency = vec![Vec::new(); n];
        for &(a, b) in shared.keys() {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
        for neighbors in &mut adjacency {
            neighbors.sort_unstable();
        }
        Self {
            adjacency,
            weights: shared,
        }
    }

    fn weight(&self, a: usize, b: usize) -> usize {
        self.weights.get(&(a.min(b), a.max(b))).copied().unwrap_or(0)
    }

    /// Articulation points (iterative Tarjan).
    fn articulation_points(&self) -> Vec<usize> {
        let adj = &self.adjacency;
        let n = adj.len();
        let unvisited = usize::MAX;
        let mut disc = vec![unvisited; n];
        let mut low = vec![0; n];
        let mut parent = vec![unvisited; n];
        let mut is_cut = vec![false; n];
        let mut timer = 0;

        for root in 0..n {
            if disc[root] != unvisited {
                continue;
            }
            disc[root] = timer;
            low[root] = timer;
            timer += 1;
            let mut root_children = 0;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(top) = stack.last_mut() {
                let u = top.0;
                if top.1 < adj[u].len() {
                    let v = adj[u][top.1];
                    top.1 += 1;
                    if disc[v] == unvisited {
                        parent[v] = u;
                        disc[v] = timer;
                        low[v] = timer;
                        timer += 1;
                        if u == root {
                            root_children += 1;
                        }
                        stack.push((v, 0));
                    } else if v != parent[u] {
                        low[u] = low[u].min(disc[v]);
                    }
                } else {
                    stack.pop();
                    if let Some(&(p, _)) = stack.last() {
                        low[p] = low[p].min(low[u]);
                        if p != root && low[u] >= disc[p] {
                            is_cut[p] = true;
                        }
                    }
                }
            }
            if root_children > 1 {
                is_cut[root] = true;
            }
        }

        (0..n).filter(|&i| is_cut[i]).collect()
    }

    /// Connected regions left among `cut`'s neighbors once `cut` is removed.
    fn regions_without(&self, cut: usize) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.adjacency.len()];
        seen[cut] = true;
        let mut regions = Vec::new();
        for &start in &self.adjacency[cut] {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut region = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(u) = queue.pop_front() {
                for &v in &self.adjacency[u] {
                    if !seen[v] {
                        seen[v] = true;
                        region.push(v);
                        queue.push_back(v);
                    }
                }
            }
            region.sort_unstable();
            regions.push(region);
        }
        regions
    }
}

impl ConnectionEngine {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DetectionEngine for ConnectionEngine {
    fn id(&self) -> &str {
        "connection"
    }

    fn discovery_type(&self) -> DiscoveryType {
        DiscoveryType::Connection
    }

    fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData> {
        require(self.config.min_corpus_size, corpus.document_count(), "documents")
    }

    async fn detect(
        &self,
        corpus: &CorpusView,
        _resources: &ModelResourceManager,
    ) -> Result<Vec<DiscoveryCandidate>, EngineError> {
        if self.precondition(corpus).is_err() {
            return Ok(Vec::new());
        }

        let graph = ReferenceGraph::build(corpus, &self.config);
        let cuts = graph.articulation_points();
        let docs = corpus.documents();
        let ids = |region: &[usize]| -> Vec<DocumentId> {
            region.iter().map(|&i| docs[i].id.clone()).collect()
        };

        let mut candidates = Vec::new();
        for &bridge in &cuts {
            let mut regions: Vec<Vec<usize>> = graph
                .regions_without(bridge)
                .into_iter()
                .filter(|r| r.len() >= self.config.min_region_size)
                .collect();
            if regions.len() < 2 {
                continue;
            }
            regions.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
            let (a, b) = (&regions[0], &regions[1]);

            let strength = |region: &[usize]| -> usize {
                region.iter().map(|&i| graph.weight(bridge, i)).sum()
            };
            let balance = b.len() as f64 / a.len() as f64;
            let link = 1.0 - (-(strength(a).min(strength(b)) as f64) / 2.0).exp();
            let confidence = (0.5 * balance + 0.5 * link).clamp(0.0, 1.0);

            let mut evidence = vec![EvidenceRef::document(docs[bridge].id.clone())];
            evidence.extend(a.iter().chain(b.iter()).map(|&i| EvidenceRef::document(docs[i].id.clone())));

            candidates.push(DiscoveryCandidate::new(
                confidence,
                evidence,
                DiscoverySummary::Connection {
                    bridge: docs[bridge].id.clone(),
                    region_a: ids(a),
                    region_b: ids(b),
                },
            )?);
        }

        debug!(
            user_id = %corpus.user_id(),
            edges = graph.weights.len(),
            articulation_points = cuts.len(),
            bridges = candidates.len(),
            "connection analysis done"
        );
        Ok(candidates)
    }
}
