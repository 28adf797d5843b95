//! Discovery: the unit of output

use super::evidence::EvidenceRef;
use super::fingerprint::dedup_key;
use super::summary::DiscoverySummary;
use crate::corpus::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when a discovery would violate its invariants
#[derive(Debug, Error, PartialEq)]
pub enum DiscoveryError {
    #[error("confidence must be finite and within [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("discovery must reference at least one piece of evidence")]
    EmptyEvidence,

    #[error("unknown discovery type: {0}")]
    UnknownType(String),

    #[error("invalid discovery id: {0}")]
    InvalidId(String),
}

/// Unique identifier for a discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryId(Uuid);

impl DiscoveryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Result<Self, DiscoveryError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DiscoveryError::InvalidId(s.to_string()))
    }
}

impl Default for DiscoveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DiscoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six discovery families, one per detection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    Pattern,
    Contradiction,
    Gap,
    Connection,
    Trend,
    Anomaly,
}

impl DiscoveryType {
    pub const ALL: [DiscoveryType; 6] = [
        DiscoveryType::Pattern,
        DiscoveryType::Contradiction,
        DiscoveryType::Gap,
        DiscoveryType::Connection,
        DiscoveryType::Trend,
        DiscoveryType::Anomaly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryType::Pattern => "pattern",
            DiscoveryType::Contradiction => "contradiction",
            DiscoveryType::Gap => "gap",
            DiscoveryType::Connection => "connection",
            DiscoveryType::Trend => "trend",
            DiscoveryType::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for DiscoveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiscoveryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DiscoveryError::UnknownType(s.to_string()))
    }
}

/// Engine output before it is scoped to a user.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryCandidate {
    confidence: f64,
    evidence: Vec<EvidenceRef>,
    summary: DiscoverySummary,
}

impl DiscoveryCandidate {
    /// Validate and build a candidate. The summary variant decides the type.
    pub fn new(
        confidence: f64,
        evidence: Vec<EvidenceRef>,
        summary: DiscoverySummary,
    ) -> Result<Self, DiscoveryError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DiscoveryError::InvalidConfidence(confidence));
        }
        if evidence.is_empty() {
            return Err(DiscoveryError::EmptyEvidence);
        }
        Ok(Self {
            confidence,
            evidence,
            summary,
        })
    }

    pub fn discovery_type(&self) -> DiscoveryType {
        self.summary.discovery_type()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn evidence(&self) -> &[EvidenceRef] {
        &self.evidence
    }

    pub fn summary(&self) -> &DiscoverySummary {
        &self.summary
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(self.discovery_type(), &self.evidence)
    }
}

/// A typed, ranked insight owned by one user.
///
/// Fields are read-only: the type in particular can never change after
/// creation. A re-detection produces a refreshed copy via [`Discovery::refreshed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    id: DiscoveryId,
    user_id: UserId,
    #[serde(rename = "type")]
    discovery_type: DiscoveryType,
    confidence: f64,
    evidence: Vec<EvidenceRef>,
    summary: DiscoverySummary,
    dedup_key: String,
    created_at: DateTime<Utc>,
}

impl Discovery {
    /// Scope a candidate to a user, assigning a fresh id and timestamp.
    pub fn from_candidate(user_id: impl Into<UserId>, candidate: DiscoveryCandidate) -> Self {
        let discovery_type = candidate.discovery_type();
        let dedup_key = candidate.dedup_key();
        Self {
            id: DiscoveryId::new(),
            user_id: user_id.into(),
            discovery_type,
            confidence: candidate.confidence,
            evidence: candidate.evidence,
            summary: candidate.summary,
            dedup_key,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> DiscoveryId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn discovery_type(&self) -> DiscoveryType {
        self.discovery_type
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn evidence(&self) -> &[EvidenceRef] {
        &self.evidence
    }

    pub fn summary(&self) -> &DiscoverySummary {
        &self.summary
    }

    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Copy of this record carrying a re-detection's confidence, timestamp and
    /// payload. Identity, owner, type and dedup key are kept.
    pub fn refreshed(&self, newer: &Discovery) -> Discovery {
        Discovery {
            id: self.id,
            user_id: self.user_id.clone(),
            discovery_type: self.discovery_type,
            confidence: newer.confidence,
            evidence: newer.evidence.clone(),
            summary: newer.summary.clone(),
            dedup_key: self.dedup_key.clone(),
            created_at: newer.created_at,
        }
    }
}
