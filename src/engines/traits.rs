//! Detection engine interface
//!
//! Each engine consumes the shared corpus view and produces discovery
//! candidates of one type. Engines are independent: one failing or timing
//! out never affects the others.

use crate::corpus::CorpusView;
use crate::discovery::{DiscoveryCandidate, DiscoveryError, DiscoveryType};
use crate::resources::{ModelResourceManager, ResourceError};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(#[from] ResourceError),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(#[from] DiscoveryError),

    #[error("engine failed: {0}")]
    Internal(String),
}

/// Why an engine has nothing to say about a corpus. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsufficientData {
    pub required: usize,
    pub available: usize,
    pub unit: &'static str,
}

impl fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "needs {} {}, corpus has {}",
            self.required, self.unit, self.available
        )
    }
}

/// Precondition helper: `available` must reach `required`.
pub fn require(required: usize, available: usize, unit: &'static str) -> Result<(), InsufficientData> {
    if available >= required {
        Ok(())
    } else {
        Err(InsufficientData {
            required,
            available,
            unit,
        })
    }
}

/// A detection algorithm producing candidates of a single discovery type.
///
/// `detect` must return an empty list (not an error) whenever
/// `precondition` fails, so callers that skip the check get the same result.
#[async_trait]
pub trait DetectionEngine: Send + Sync {
    /// Stable identifier, used for registry dedup and logging.
    fn id(&self) -> &str;

    fn discovery_type(&self) -> DiscoveryType;

    /// Corpus-size check, run before any resource is touched.
    fn precondition(&self, corpus: &CorpusView) -> Result<(), InsufficientData>;

    async fn detect(
        &self,
        corpus: &CorpusView,
        resources: &ModelResourceManager,
    ) -> Result<Vec<DiscoveryCandidate>, EngineError>;
}
