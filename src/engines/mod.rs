//! Detection engines
//!
//! Six independent engines, one per discovery type. The registry builds the
//! enabled set from configuration; the coordinator runs them concurrently.

mod anomaly;
mod connection;
mod contradiction;
mod gap;
mod pattern;
mod registry;
mod traits;
mod trend;

pub use anomaly::{AnomalyConfig, AnomalyEngine, IsolationForest};
pub use connection::{extract_references, ConnectionConfig, ConnectionEngine};
pub use contradiction::{classify_kind, ContradictionConfig, ContradictionEngine};
pub use gap::{GapConfig, GapEngine};
pub use pattern::{dbscan, PatternConfig, PatternEngine};
pub use registry::EngineRegistry;
pub use traits::{require, DetectionEngine, EngineError, InsufficientData};
pub use trend::{TrendConfig, TrendEngine};

use crate::corpus::{CorpusView, DocumentId};
use crate::resources::ModelResourceManager;

/// Embedding for every document, in corpus order.
///
/// The coordinator fills embeddings when it builds the view; documents that
/// still lack one are embedded here from their full text.
pub(crate) async fn document_vectors<'a>(
    corpus: &'a CorpusView,
    resources: &ModelResourceManager,
) -> Result<Vec<(&'a DocumentId, Vec<f32>)>, EngineError> {
    let missing: Vec<usize> = corpus
        .documents()
        .iter()
        .enumerate()
        .filter(|(_, d)| d.embedding.is_none())
        .map(|(i, _)| i)
        .collect();

    let mut filled = Vec::new();
    if !missing.is_empty() {
        let embedder = resources.embedder().await?;
        let texts: Vec<String> = missing
            .iter()
            .map(|&i| corpus.documents()[i].full_text())
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        filled = embedder
            .embed_batch(&refs)
            .map_err(|e| EngineError::Internal(format!("embedding failed: {}", e)))?;
        if filled.len() != missing.len() {
            return Err(EngineError::Internal(
                "embedder returned the wrong number of vectors".to_string(),
            ));
        }
    }

    let mut filled = filled.into_iter();
    Ok(corpus
        .documents()
        .iter()
        .filter_map(|d| match &d.embedding {
            Some(e) => Some((&d.id, e.clone())),
            None => filled.next().map(|v| (&d.id, v)),
        })
        .collect())
}
