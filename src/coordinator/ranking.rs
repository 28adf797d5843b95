//! Batch deduplication and final ordering

use crate::discovery::DiscoveryCandidate;
use std::collections::HashMap;

/// A candidate paired with its dedup key, computed once.
pub(crate) type Keyed = (String, DiscoveryCandidate);

/// Collapse candidates sharing a dedup key, keeping the most confident.
///
/// Returns the survivors and how many were dropped.
pub(crate) fn dedup_batch(candidates: Vec<DiscoveryCandidate>) -> (Vec<Keyed>, usize) {
    let total = candidates.len();
    let mut best: HashMap<String, DiscoveryCandidate> = HashMap::with_capacity(total);
    for candidate in candidates {
        let key = candidate.dedup_key();
        match best.get(&key) {
            Some(kept) if kept.confidence() >= candidate.confidence() => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }
    let kept: Vec<Keyed> = best.into_iter().collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

/// Confidence descending, then discovery type, then dedup key.
pub(crate) fn rank(entries: &mut [Keyed]) {
    entries.sort_by(|(ka, a), (kb, b)| {
        b.confidence()
            .total_cmp(&a.confidence())
            .then_with(|| a.discovery_type().cmp(&b.discovery_type()))
            .then_with(|| ka.cmp(kb))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoverySummary, EvidenceRef};

    fn anomaly(doc: &str, confidence: f64) -> DiscoveryCandidate {
        DiscoveryCandidate::new(
            confidence,
            vec![EvidenceRef::document(doc)],
            DiscoverySummary::Anomaly {
                document_id: doc.into(),
                score: confidence,
                mean_path_length: 1.0,
            },
        )
        .unwrap()
    }

    fn gap(topic: &str, confidence: f64) -> DiscoveryCandidate {
        DiscoveryCandidate::new(
            confidence,
            vec![EvidenceRef::topic(topic)],
            DiscoverySummary::Gap {
                topic: topic.to_string(),
                description: String::new(),
                coverage: 0.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn highest_confidence_wins_within_batch() {
        let (kept, dropped) = dedup_batch(vec![anomaly("d1", 0.7), anomaly("d1", 0.9), anomaly("d2", 0.8)]);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        let d1 = kept
            .iter()
            .find(|(_, c)| c.evidence()[0] == EvidenceRef::document("d1"))
            .unwrap();
        assert_eq!(d1.1.confidence(), 0.9);
    }

    #[test]
    fn ties_break_on_type_then_key() {
        let (mut kept, _) = dedup_batch(vec![anomaly("b", 0.8), gap("z", 0.8), anomaly("a", 0.8), gap("y", 0.9)]);
        rank(&mut kept);
        let confidences: Vec<f64> = kept.iter().map(|(_, c)| c.confidence()).collect();
        assert_eq!(confidences, vec![0.9, 0.8, 0.8, 0.8]);
        // Gap sorts before Anomaly at equal confidence.
        assert!(matches!(kept[1].1.summary(), DiscoverySummary::Gap { .. }));
        assert!(kept[2].0 < kept[3].0);
    }
}
