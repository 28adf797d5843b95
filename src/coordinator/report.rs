//! Per-run reporting

use crate::corpus::UserId;
use crate::discovery::DiscoveryType;
use crate::engines::InsufficientData;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// How one engine fared during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// Ran to completion with this many candidates (possibly zero)
    Completed(usize),
    /// Skipped: the corpus is below the engine's minimum
    InsufficientData(InsufficientData),
    /// A required model resource could not be loaded
    Unavailable(String),
    /// Returned an error or panicked
    Failed(String),
    TimedOut,
}

impl EngineOutcome {
    pub fn candidates(&self) -> usize {
        match self {
            EngineOutcome::Completed(n) => *n,
            _ => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EngineOutcome::Unavailable(_) | EngineOutcome::Failed(_) | EngineOutcome::TimedOut
        )
    }
}

impl fmt::Display for EngineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineOutcome::Completed(n) => write!(f, "completed ({} candidates)", n),
            EngineOutcome::InsufficientData(why) => write!(f, "insufficient data ({})", why),
            EngineOutcome::Unavailable(why) => write!(f, "unavailable ({})", why),
            EngineOutcome::Failed(why) => write!(f, "failed ({})", why),
            EngineOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineReport {
    pub engine: String,
    pub discovery_type: DiscoveryType,
    pub outcome: EngineOutcome,
    pub elapsed: Duration,
}

/// Everything that happened in one coordinator run for one user.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub engines: Vec<EngineReport>,
    /// Candidates produced across all engines
    pub candidates: usize,
    /// Dropped within the batch for sharing a dedup key
    pub duplicates: usize,
    /// Matched an active discovery and were not refreshed
    pub already_known: usize,
    /// Matched an active discovery and were written again
    pub refreshed: usize,
    /// Cut by `max_discoveries`
    pub truncated: usize,
    /// Failed to persist after the retry
    pub dropped: usize,
    pub persisted: usize,
    pub snapshot_recorded: bool,
}

impl RunReport {
    pub(crate) fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            engines: Vec::new(),
            candidates: 0,
            duplicates: 0,
            already_known: 0,
            refreshed: 0,
            truncated: 0,
            dropped: 0,
            persisted: 0,
            snapshot_recorded: false,
        }
    }

    pub fn outcome(&self, engine: &str) -> Option<&EngineOutcome> {
        self.engines
            .iter()
            .find(|r| r.engine == engine)
            .map(|r| &r.outcome)
    }

    pub fn failed_engines(&self) -> Vec<&str> {
        self.engines
            .iter()
            .filter(|r| r.outcome.is_failure())
            .map(|r| r.engine.as_str())
            .collect()
    }
}
