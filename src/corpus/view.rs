//! Per-user, per-run corpus snapshot shared by every engine in a run

use crate::resources::{mean_vector, Embedder, EmbeddingError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::snapshot::CorpusSnapshot;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

pub(crate) use string_id;

string_id!(
    /// Owner scope for corpora and discoveries
    UserId
);
string_id!(
    /// Identifier assigned by the document store
    DocumentId
);
string_id!(
    /// Identifier of a passage within the document store
    PassageId
);

/// A document as handed over by the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Explicit references (citations, links) recorded at ingestion
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            created_at: Utc::now(),
            references: Vec::new(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_references<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Title and body joined, the text used for embedding and topic fitting.
    pub fn full_text(&self) -> String {
        if self.title.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n{}", self.title, self.text)
        }
    }
}

/// A passage (chunk) of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    pub document_id: DocumentId,
    #[serde(default)]
    pub ordinal: u32,
    pub text: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl Passage {
    pub fn new(
        id: impl Into<PassageId>,
        document_id: impl Into<DocumentId>,
        ordinal: u32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            ordinal,
            text: text.into(),
            embedding: None,
        }
    }
}

/// Serialized corpus as accepted by `SqliteStore::import_corpus`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusExport {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub passages: Vec<Passage>,
}

/// Read-only view over one user's corpus for a single coordinator run.
///
/// Built once per run and shared behind an `Arc`; engines never mutate it.
/// Embeddings are completed before sharing (see [`CorpusView::ensure_embeddings`]).
#[derive(Debug, Clone)]
pub struct CorpusView {
    user_id: UserId,
    documents: Vec<Document>,
    passages: Vec<Passage>,
    snapshots: Vec<CorpusSnapshot>,
    built_at: DateTime<Utc>,
    doc_index: HashMap<DocumentId, usize>,
}

impl CorpusView {
    pub fn new(user_id: impl Into<UserId>, documents: Vec<Document>, passages: Vec<Passage>) -> Self {
        let doc_index = documents
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        Self {
            user_id: user_id.into(),
            documents,
            passages,
            snapshots: Vec::new(),
            built_at: Utc::now(),
            doc_index,
        }
    }

    pub fn empty(user_id: impl Into<UserId>) -> Self {
        Self::new(user_id, Vec::new(), Vec::new())
    }

    /// Attach historical snapshots, kept in chronological order.
    pub fn with_snapshots(mut self, mut snapshots: Vec<CorpusSnapshot>) -> Self {
        snapshots.sort_by_key(|s| s.window_start);
        self.snapshots = snapshots;
        self
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn snapshots(&self) -> &[CorpusSnapshot] {
        &self.snapshots
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Document> {
        self.doc_index.get(id).map(|&i| &self.documents[i])
    }

    pub fn contains_document(&self, id: &DocumentId) -> bool {
        self.doc_index.contains_key(id)
    }

    /// Documents paired with their embedding, skipping any without one.
    pub fn document_embeddings(&self) -> Vec<(&DocumentId, &[f32])> {
        self.documents
            .iter()
            .filter_map(|d| d.embedding.as_deref().map(|e| (&d.id, e)))
            .collect()
    }

    /// Fill in missing passage and document embeddings.
    ///
    /// Passages without a vector are embedded in one batch. A document
    /// without a vector takes the mean of its passages, or is embedded from
    /// its full text when it has none.
    pub fn ensure_embeddings(&mut self, embedder: &dyn Embedder) -> Result<usize, EmbeddingError> {
        let mut embedded = 0;

        let missing: Vec<usize> = self
            .passages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            let texts: Vec<&str> = missing.iter().map(|&i| self.passages[i].text.as_str()).collect();
            let vectors = embedder.embed_batch(&texts)?;
            if vectors.len() != missing.len() {
                return Err(EmbeddingError::EmptyResult);
            }
            for (i, vector) in missing.into_iter().zip(vectors) {
                self.passages[i].embedding = Some(vector);
                embedded += 1;
            }
        }

        let mut by_document: HashMap<&DocumentId, Vec<&[f32]>> = HashMap::new();
        for passage in &self.passages {
            if let Some(e) = passage.embedding.as_deref() {
                by_document.entry(&passage.document_id).or_default().push(e);
            }
        }
        let means: Vec<Option<Vec<f32>>> = self
            .documents
            .iter()
            .map(|d| match d.embedding {
                Some(_) => None,
                None => by_document.get(&d.id).and_then(|vs| mean_vector(vs)),
            })
            .collect();

        let mut needs_text = Vec::new();
        for (i, mean) in means.into_iter().enumerate() {
            if self.documents[i].embedding.is_some() {
                continue;
            }
            match mean {
                Some(v) => {
                    self.documents[i].embedding = Some(v);
                    embedded += 1;
                }
                None => needs_text.push(i),
            }
        }

        if !needs_text.is_empty() {
            let texts: Vec<String> = needs_text.iter().map(|&i| self.documents[i].full_text()).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let vectors = embedder.embed_batch(&refs)?;
            if vectors.len() != needs_text.len() {
                return Err(EmbeddingError::EmptyResult);
            }
            for (i, vector) in needs_text.into_iter().zip(vectors) {
                self.documents[i].embedding = Some(vector);
                embedded += 1;
            }
        }

        Ok(embedded)
    }
}
