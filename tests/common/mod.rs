//! Shared helpers for integration tests
//!
//! Corpus builders with known structure, and boundary fakes that inject
//! failures into an otherwise ordinary in-memory store.

#![allow(dead_code)]

pub mod corpus;
pub mod fakes;

pub use corpus::{contradictory_pair, three_group_corpus, GROUPS};
pub use fakes::{FailingCorpus, FlakyRepository};

use discovery_engine::config::DiscoveryConfig;
use discovery_engine::{EngineRegistry, ModelResourceManager};
use std::sync::Arc;

/// Registry and resources exactly as the binary builds them from defaults.
pub fn default_stack() -> (EngineRegistry, Arc<ModelResourceManager>) {
    let config = DiscoveryConfig::default();
    (
        EngineRegistry::from_config(&config.engines, &config.taxonomy),
        Arc::new(ModelResourceManager::from_config(&config.resources)),
    )
}
