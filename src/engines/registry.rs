//! Registry of detection engines
//!
//! Engines are deduplicated by `id()`: registering the same engine twice
//! runs it once per coordinator run.

use super::traits::DetectionEngine;
use super::{
    AnomalyEngine, ConnectionEngine, ContradictionEngine, GapEngine, PatternEngine, TrendEngine,
};
use crate::config::{EnginesConfig, Taxonomy};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn DetectionEngine>>,
}

impl EngineRegistry {
    /// Create a registry with the given engines, deduplicated by id.
    pub fn new(engines: Vec<Arc<dyn DetectionEngine>>) -> Self {
        let mut seen = HashSet::new();
        let deduped: Vec<_> = engines
            .into_iter()
            .filter(|e| seen.insert(e.id().to_string()))
            .collect();
        Self { engines: deduped }
    }

    pub fn empty() -> Self {
        Self {
            engines: Vec::new(),
        }
    }

    /// The six built-in engines, minus those disabled in configuration.
    pub fn from_config(config: &EnginesConfig, taxonomy: &Taxonomy) -> Self {
        let mut engines: Vec<Arc<dyn DetectionEngine>> = Vec::new();
        if config.pattern.enabled {
            engines.push(Arc::new(PatternEngine::new(config.pattern.clone())));
        }
        if config.contradiction.enabled {
            engines.push(Arc::new(ContradictionEngine::new(config.contradiction.clone())));
        }
        if config.gap.enabled {
            engines.push(Arc::new(GapEngine::new(config.gap.clone(), taxonomy.clone())));
        }
        if config.connection.enabled {
            engines.push(Arc::new(ConnectionEngine::new(config.connection.clone())));
        }
        if config.trend.enabled {
            engines.push(Arc::new(TrendEngine::new(config.trend.clone())));
        }
        if config.anomaly.enabled {
            engines.push(Arc::new(AnomalyEngine::new(config.anomaly.clone())));
        }
        Self::new(engines)
    }

    pub fn engines(&self) -> &[Arc<dyn DetectionEngine>] {
        &self.engines
    }

    pub fn ids(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
