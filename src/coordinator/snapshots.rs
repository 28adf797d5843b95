//! Topic-prevalence snapshot recording
//!
//! Each run writes the current window's prevalence so later runs have a
//! series to compare. Windows are fixed-length and aligned to the Unix
//! epoch, so every run inside one window updates the same snapshot.
//!
//! Tracked topics are this window's fitted topics plus every topic recorded
//! in earlier windows. A share is the fraction of documents containing the
//! topic label, independent of which topics the fit happened to keep.

use crate::corpus::{CorpusSnapshot, CorpusView};
use crate::resources::{folded_terms, TopicModel};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeSet, HashSet};

/// The `[start, end)` window containing `at`.
pub fn window_bounds(at: DateTime<Utc>, window: Duration) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let length = window.num_seconds().max(1);
    let secs = at.timestamp();
    let start = Utc.timestamp_opt(secs - secs.rem_euclid(length), 0).single()?;
    Some((start, start + Duration::seconds(length)))
}

#[derive(Debug, Clone)]
pub struct SnapshotRecorder {
    window: Duration,
}

impl SnapshotRecorder {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Snapshot of the corpus for the window containing `at`.
    ///
    /// Earlier windows are read from `corpus.snapshots()`. A carried topic is
    /// dropped once it has been at zero in both the latest earlier window and
    /// this one. `None` for an empty corpus or an unrepresentable window.
    pub fn snapshot(
        &self,
        corpus: &CorpusView,
        model: &dyn TopicModel,
        at: DateTime<Utc>,
    ) -> Option<CorpusSnapshot> {
        if corpus.is_empty() {
            return None;
        }
        let (start, end) = window_bounds(at, self.window)?;
        let texts: Vec<String> = corpus.documents().iter().map(|d| d.full_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let doc_terms: Vec<HashSet<String>> = refs.iter().map(|t| folded_terms(t)).collect();
        let share = |label: &str| {
            doc_terms.iter().filter(|terms| terms.contains(label)).count() as f64
                / doc_terms.len() as f64
        };

        let earlier: Vec<&CorpusSnapshot> = corpus
            .snapshots()
            .iter()
            .filter(|s| s.window_start < start)
            .collect();
        let latest = earlier.last();

        let mut labels: BTreeSet<String> = model.fit(&refs).into_iter().map(|t| t.label).collect();
        labels.extend(
            earlier
                .iter()
                .flat_map(|s| s.topic_prevalence.keys().cloned()),
        );

        let snapshot = labels.into_iter().fold(
            CorpusSnapshot::new(corpus.user_id().clone(), start, end)
                .with_document_count(corpus.document_count()),
            |s, label| {
                let current = share(&label);
                let previous = latest.and_then(|l| l.prevalence(&label)).unwrap_or(0.0);
                if current > 0.0 || previous > 0.0 {
                    s.with_prevalence(label, current)
                } else {
                    s
                }
            },
        );
        Some(snapshot)
    }
}

impl Default for SnapshotRecorder {
    fn default() -> Self {
        Self::new(Duration::days(1))
    }
}
