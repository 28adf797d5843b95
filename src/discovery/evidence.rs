//! References from a discovery back to the material that justifies it

use crate::corpus::{DocumentId, PassageId, SnapshotId};
use serde::{Deserialize, Serialize};

/// One piece of evidence: a document, a passage, a snapshot or a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceRef {
    Document {
        document_id: DocumentId,
    },
    Passage {
        document_id: DocumentId,
        passage_id: PassageId,
    },
    Snapshot {
        snapshot_id: SnapshotId,
    },
    /// A topic label, from the reference taxonomy or a fitted topic
    Topic {
        label: String,
    },
}

impl EvidenceRef {
    pub fn document(id: impl Into<DocumentId>) -> Self {
        EvidenceRef::Document {
            document_id: id.into(),
        }
    }

    pub fn passage(document_id: impl Into<DocumentId>, passage_id: impl Into<PassageId>) -> Self {
        EvidenceRef::Passage {
            document_id: document_id.into(),
            passage_id: passage_id.into(),
        }
    }

    pub fn snapshot(id: impl Into<SnapshotId>) -> Self {
        EvidenceRef::Snapshot {
            snapshot_id: id.into(),
        }
    }

    pub fn topic(label: impl Into<String>) -> Self {
        EvidenceRef::Topic {
            label: label.into(),
        }
    }

    /// Canonical text form used for fingerprinting.
    pub fn normalized_key(&self) -> String {
        match self {
            EvidenceRef::Document { document_id } => format!("doc:{}", document_id),
            EvidenceRef::Passage {
                document_id,
                passage_id,
            } => format!("passage:{}/{}", document_id, passage_id),
            EvidenceRef::Snapshot { snapshot_id } => format!("snapshot:{}", snapshot_id),
            EvidenceRef::Topic { label } => format!("topic:{}", label.to_lowercase()),
        }
    }

    /// The document this reference points into, if any.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            EvidenceRef::Document { document_id } | EvidenceRef::Passage { document_id, .. } => {
                Some(document_id)
            }
            EvidenceRef::Snapshot { .. } | EvidenceRef::Topic { .. } => None,
        }
    }
}
