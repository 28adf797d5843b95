//! Trend engine: topic-prevalence movement across corpus snapshots
//!
//! Series are read in chronological order over the most recent windows.
//! A series is a monotonic trend when its pairwise (Kendall-style)
//! consistency and net change are both large enough; otherwise it may still
//! be a step trend when it splits into two flat segments at different levels.
//! A window that did not track a topic is left out of that topic's series.

use super::traits::{require, DetectionEngine, EngineError, InsufficientData};
use crate::corpus::{CorpusSnapshot, CorpusView};
use crate::discovery::{
    DiscoveryCandidate, DiscoverySummary, DiscoveryType, EvidenceRef, TrendDirection, TrendShape,
};
use crate::resources::ModelResourceManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

const FLAT: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub enabled: bool,
    pub min_snapshots: usize,
    pub max_snapshots: usize,
    /// Minimum |tau| for a monotonic trend
    pub min_consistency: f64,
    /// Minimum |last - first| for a monotonic trend, relative to the larger endpoint
    pub min_change: f64,
    /// Minimum mean shift for a step trend
    pub min_step: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_snapshots: 3,
            max_snapshots: 12,
            min_consistency: 0.8,
            min_change: 0.05,
            min_step: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TrendFit {
    direction: TrendDirection,
    shape: TrendShape,
    confidence: f64,
    /// Indices into the window that the trend rests on
    involved: Vec<usize>,
}

pub struct TrendEngine {
    config: TrendConfig,
}

impl TrendEngine {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    fn direction(delta: f64) -> TrendDirection {
        if delta > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Falling
        }
    }

    fn monotonic(&self, series: &[f64]) -> Option<TrendFit> {
        let n = series.len();
        let tau = kendall_tau(series);
        let change = series[n - 1] - series[0];
        let scale = series[0].abs().max(series[n - 1].abs()).max(FLAT);
        let magnitude = (change.abs() / scale).min(1.0);
        if tau.abs() < self.config.min_consistency
            || magnitude < self.config.min_change
            || tau.signum() != change.signum()
        {
            return None;
        }
        Some(TrendFit {
            direction: Self::direction(change),
            shape: TrendShape::Monotonic,
            confidence: (tau.abs() * (0.5 + 0.5 * magnitude)).clamp(0.0, 1.0),
            involved: (0..n).collect(),
        })
    }

    fn step(&self, series: &[f64]) -> Option<TrendFit> {
        let mut best: Option<(f64, TrendFit)> = None;
        for split in 1..series.len() {
            let (before, after) = series.split_at(split);
            let (mean_b, mean_a) = (mean(before), mean(after));
            let shift = mean_a - mean_b;
            if shift.abs() < self.config.min_step {
                continue;
            }
            let deviation = max_deviation(before, mean_b).max(max_deviation(after, mean_a));
            if deviation > shift.abs() * 0.25 {
                continue;
            }
            let level = mean_a.abs().max(mean_b.abs()).max(FLAT);
            let confidence = (0.5 * (1.0 - deviation / shift.abs())
                + 0.5 * (shift.abs() / level).min(1.0))
            .clamp(0.0, 1.0);
            let score = shift.abs() - deviation;
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((
                    score,
                    TrendFit {
                        direction: Self::direction(shift),
                        shape: TrendShape::Step,
                        confidence,
                        involved: vec![split - 1, split],
                    },
                ));
            }
        }
        best.map(|(_, fit)| fit)
    }

    fn fit(&self, series: &[f64]) -> Option<TrendFit> {
        self.monotonic(series).or_else(|| self.step(series))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn max_deviation(values: &[f64], center: f64) -> f64 {
    values.iter().map(|v| (v - center).abs()).fold(0.0, f64::max)
}

/// Kendall-style consistency: concordant minus discordant pairs over all pairs.
fn kendall_tau(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return 0.0;
    }
    let mut score = 0i64;
    for i in 0..n {
        for j in i + 1..n {
            let d = series[j] - series[i];
            if d > FLAT {
                score += 1;
            } else if d < -FLAT {
                score -= 1;
            }
        }
    }
    score as f64 / (n * (n - 1) / 2) as f64
}

#[async_trait]
impl DetectionEngine for TrendEngine {
    fn id(&self) -> &str {
        "trend"
    }

    fn discovery_type(&self) -> DiscoveryType {
        DiscoveryType::Trend
    }

    fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData> {
        let distinct: BTreeSet<_> = corpus.snapshots().iter().map(|s| s.window_start).collect();
        require(self.config.min_snapshots, distinct.len(), "snapshots")
    }

    async fn detect(
        &self,
        corpus: &CorpusView,
        _resources: &ModelResourceManager,
    ) -> Result<Vec<DiscoveryCandidate>, EngineError> {
        if self.precondition(corpus).is_err() {
            return Ok(Vec::new());
        }

        // One snapshot per window, chronological, most recent windows only.
        let mut window: Vec<&CorpusSnapshot> = Vec::new();
        for snapshot in corpus.snapshots() {
            match window.last_mut() {
                Some(last) if last.window_start == snapshot.window_start => *last = snapshot,
                _ => window.push(snapshot),
            }
        }
        let skip = window.len().saturating_sub(self.config.max_snapshots);
        let window = &window[skip..];

        let topics: BTreeSet<&str> = window
            .iter()
            .flat_map(|s| s.topic_prevalence.keys().map(String::as_str))
            .collect();

        let mut candidates = Vec::new();
        for topic in topics {
            let (points, series): (Vec<&CorpusSnapshot>, Vec<f64>) = window
                .iter()
                .filter_map(|s| s.prevalence(topic).map(|p| (*s, p)))
                .unzip();
            if series.len() < self.config.min_snapshots {
                continue;
            }
            let Some(fit) = self.fit(&series) else {
                continue;
            };
            let mut evidence = vec![EvidenceRef::topic(topic)];
            evidence.extend(fit.involved.iter().map(|&i| EvidenceRef::snapshot(points[i].id.clone())));
            candidates.push(DiscoveryCandidate::new(
                fit.confidence,
                evidence,
                DiscoverySummary::Trend {
                    topic: topic.to_string(),
                    direction: fit.direction,
                    shape: fit.shape,
                    series,
                },
            )?);
        }

        debug!(
            user_id = %corpus.user_id(),
            windows = window.len(),
            trends = candidates.len(),
            "trend comparison done"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn snapshots(series: &[(&str, Vec<f64>)]) -> Vec<CorpusSnapshot> {
        let len = series[0].1.len();
        let origin = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        (0..len)
            .map(|i| {
                let start = origin + Duration::days(i as i64);
                series.iter().fold(
                    CorpusSnapshot::new("u1", start, start + Duration::days(1)),
                    |s, (topic, values)| s.with_prevalence(*topic, values[i]),
                )
            })
            .collect()
    }

    fn view(series: &[(&str, Vec<f64>)]) -> CorpusView {
        CorpusView::empty("u1").with_snapshots(snapshots(series))
    }

    fn engine() -> TrendEngine {
        TrendEngine::new(TrendConfig::default())
    }

    #[tokio::test]
    async fn fewer_than_three_snapshots_is_empty() {
        let v = view(&[("faith", vec![0.1, 0.5])]);
        assert!(engine().precondition(&v).is_err());
        assert!(engine()
            .detect(&v, &ModelResourceManager::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn strictly_increasing_series_is_a_trend() {
        let v = view(&[("faith", vec![0.1, 0.2, 0.3]), ("stable", vec![0.4, 0.4, 0.4])]);
        let found = engine().detect(&v, &ModelResourceManager::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        match found[0].summary() {
            DiscoverySummary::Trend {
                topic,
                direction,
                shape,
                ..
            } => {
                assert_eq!(topic, "faith");
                assert_eq!(*direction, TrendDirection::Rising);
                assert_eq!(*shape, TrendShape::Monotonic);
            }
            other => panic!("unexpected summary {:?}", other),
        }
        // topic + three snapshots
        assert_eq!(found[0].evidence().len(), 4);
    }

    #[tokio::test]
    async fn small_steady_increase_is_a_trend() {
        let v = view(&[("faith", vec![0.30, 0.32, 0.34])]);
        let found = engine().detect(&v, &ModelResourceManager::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(matches!(
            found[0].summary(),
            DiscoverySummary::Trend {
                direction: TrendDirection::Rising,
                shape: TrendShape::Monotonic,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn untracked_windows_are_not_zero() {
        let origin = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let day = |i: i64| origin + Duration::days(i);
        let snapshots = vec![
            CorpusSnapshot::new("u1", day(0), day(1)).with_prevalence("star", 0.5),
            CorpusSnapshot::new("u1", day(1), day(2)).with_prevalence("star", 0.5),
            CorpusSnapshot::new("u1", day(2), day(3)).with_prevalence("planet", 0.5),
        ];
        let v = CorpusView::empty("u1").with_snapshots(snapshots);
        assert!(engine()
            .detect(&v, &ModelResourceManager::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn level_shift_is_a_step_trend() {
        let v = view(&[("grace", vec![0.6, 0.62, 0.61, 0.2, 0.21, 0.2])]);
        let found = engine().detect(&v, &ModelResourceManager::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        match found[0].summary() {
            DiscoverySummary::Trend {
                direction, shape, ..
            } => {
                assert_eq!(*direction, TrendDirection::Falling);
                assert_eq!(*shape, TrendShape::Step);
            }
            other => panic!("unexpected summary {:?}", other),
        }
    }

    #[tokio::test]
    async fn noisy_series_is_not_a_trend() {
        let v = view(&[("noise", vec![0.3, 0.1, 0.35, 0.12, 0.3])]);
        assert!(engine()
            .detect(&v, &ModelResourceManager::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn tau_bounds() {
        assert_eq!(kendall_tau(&[1.0, 2.0, 3.0]), 1.0);
        assert_eq!(kendall_tau(&[3.0, 2.0, 1.0]), -1.0);
        assert_eq!(kendall_tau(&[1.0, 1.0, 1.0]), 0.0);
    }
}
