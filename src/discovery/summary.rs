//! Type-specific description payloads

use super::types::DiscoveryType;
use crate::corpus::{DocumentId, PassageId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Surface classification of a contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    /// Opposing claims about the same fact
    Factual,
    /// Disagreement about dates, order or duration
    Temporal,
    /// Disagreement about belief, teaching or obligation
    Doctrinal,
    /// Same claim with different quantities
    Numerical,
}

impl ContradictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContradictionKind::Factual => "factual",
            ContradictionKind::Temporal => "temporal",
            ContradictionKind::Doctrinal => "doctrinal",
            ContradictionKind::Numerical => "numerical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendShape {
    /// Consistent movement across the windows
    Monotonic,
    /// A level shift between two stable segments
    Step,
}

/// Human-readable payload; the variant fixes the discovery's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoverySummary {
    Pattern {
        size: usize,
        cohesion: f64,
        key_terms: Vec<String>,
    },
    Contradiction {
        passage_a: PassageId,
        passage_b: PassageId,
        document_a: DocumentId,
        document_b: DocumentId,
        relation: String,
        kind: ContradictionKind,
    },
    Gap {
        topic: String,
        description: String,
        coverage: f64,
    },
    Connection {
        bridge: DocumentId,
        region_a: Vec<DocumentId>,
        region_b: Vec<DocumentId>,
    },
    Trend {
        topic: String,
        direction: TrendDirection,
        shape: TrendShape,
        series: Vec<f64>,
    },
    Anomaly {
        document_id: DocumentId,
        score: f64,
        mean_path_length: f64,
    },
}

impl DiscoverySummary {
    pub fn discovery_type(&self) -> DiscoveryType {
        match self {
            DiscoverySummary::Pattern { .. } => DiscoveryType::Pattern,
            DiscoverySummary::Contradiction { .. } => DiscoveryType::Contradiction,
            DiscoverySummary::Gap { .. } => DiscoveryType::Gap,
            DiscoverySummary::Connection { .. } => DiscoveryType::Connection,
            DiscoverySummary::Trend { .. } => DiscoveryType::Trend,
            DiscoverySummary::Anomaly { .. } => DiscoveryType::Anomaly,
        }
    }
}

impl fmt::Display for DiscoverySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoverySummary::Pattern { size, key_terms, .. } => {
                if key_terms.is_empty() {
                    write!(f, "{} documents form a cluster", size)
                } else {
                    write!(f, "{} documents cluster around {}", size, key_terms.join(", "))
                }
            }
            DiscoverySummary::Contradiction {
                passage_a,
                passage_b,
                kind,
                ..
            } => write!(
                f,
                "{} contradiction between passages {} and {}",
                kind.as_str(),
                passage_a,
                passage_b
            ),
            DiscoverySummary::Gap { topic, coverage, .. } => {
                write!(f, "'{}' is barely covered (coverage {:.2})", topic, coverage)
            }
            DiscoverySummary::Connection {
                bridge,
                region_a,
                region_b,
            } => write!(
                f,
                "{} links a group of {} documents with a group of {}",
                bridge,
                region_a.len(),
                region_b.len()
            ),
            DiscoverySummary::Trend {
                topic,
                direction,
                shape,
                ..
            } => {
                let dir = match direction {
                    TrendDirection::Rising => "rising",
                    TrendDirection::Falling => "falling",
                };
                let shape = match shape {
                    TrendShape::Monotonic => "steadily",
                    TrendShape::Step => "sharply",
                };
                write!(f, "'{}' is {} {}", topic, shape, dir)
            }
            DiscoverySummary::Anomaly {
                document_id, score, ..
            } => write!(f, "{} is an outlier (score {:.2})", document_id, score),
        }
    }
}
