//! Process configuration
//!
//! Loaded once at startup from YAML. Every field has a default, so an empty
//! file (or no file) yields a working configuration.

use crate::engines::{
    AnomalyConfig, ConnectionConfig, ContradictionConfig, GapConfig, PatternConfig, TrendConfig,
};
use crate::resources::KeywordTopicModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub scheduler: SchedulerConfig,
    pub coordinator: CoordinatorConfig,
    pub engines: EnginesConfig,
    pub resources: ResourcesConfig,
    /// Reference taxonomy for the gap engine: label -> description
    pub taxonomy: Taxonomy,
    /// Separate YAML file holding the taxonomy; merged over the inline one
    pub taxonomy_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub max_concurrent_users: usize,
    pub run_on_startup: bool,
    /// How far back the first cycle looks for active users
    pub initial_lookback_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            max_concurrent_users: 4,
            run_on_startup: false,
            initial_lookback_secs: 24 * 60 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.initial_lookback_secs.min(u32::MAX as u64) as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_discoveries: usize,
    pub engine_timeout_secs: u64,
    pub persist_backoff_ms: u64,
    /// Refresh confidence and timestamp of re-detected active discoveries
    pub refresh_existing: bool,
    pub record_snapshots: bool,
    pub snapshot_window_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_discoveries: 50,
            engine_timeout_secs: 120,
            persist_backoff_ms: 250,
            refresh_existing: false,
            record_snapshots: true,
            snapshot_window_secs: 24 * 60 * 60,
        }
    }
}

impl CoordinatorConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }

    pub fn snapshot_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.snapshot_window_secs.min(u32::MAX as u64) as i64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    pub pattern: PatternConfig,
    pub contradiction: ContradictionConfig,
    pub gap: GapConfig,
    pub connection: ConnectionConfig,
    pub trend: TrendConfig,
    pub anomaly: AnomalyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub embedding: EmbeddingBackend,
    pub topic_model: KeywordTopicModel,
}

/// Which embedder backs the `Embedder` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Hashing {
        #[serde(default = "default_hashing_dimension")]
        dimension: usize,
    },
    /// Requires the `embeddings` feature
    Fastembed,
}

fn default_hashing_dimension() -> usize {
    256
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::Hashing {
            dimension: default_hashing_dimension(),
        }
    }
}

/// Static reference taxonomy: topic label -> description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Taxonomy(BTreeMap<String, String>);

impl Taxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, label: impl Into<String>, description: impl Into<String>) -> Self {
        self.0.insert(label.into(), description.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Topics in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(l, d)| (l.as_str(), d.as_str()))
    }

    fn extend(&mut self, other: Taxonomy) {
        self.0.extend(other.0);
    }
}

impl DiscoveryConfig {
    /// Load from a YAML file, resolve `taxonomy_path` relative to it, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: DiscoveryConfig = read_yaml(path)?;
        if let Some(taxonomy_path) = config.taxonomy_path.clone() {
            let resolved = if taxonomy_path.is_relative() {
                path.parent()
                    .map(|dir| dir.join(&taxonomy_path))
                    .unwrap_or(taxonomy_path)
            } else {
                taxonomy_path
            };
            let external: Taxonomy = read_yaml(&resolved)?;
            config.taxonomy.extend(external);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: DiscoveryConfig =
            serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut check = |ok: bool, msg: &str| {
            if !ok {
                problems.push(msg.to_string());
            }
        };

        check(self.scheduler.interval_secs > 0, "scheduler.interval_secs must be > 0");
        check(
            self.scheduler.max_concurrent_users > 0,
            "scheduler.max_concurrent_users must be > 0",
        );
        check(
            self.coordinator.max_discoveries > 0,
            "coordinator.max_discoveries must be > 0",
        );
        check(
            self.coordinator.engine_timeout_secs > 0,
            "coordinator.engine_timeout_secs must be > 0",
        );
        check(
            self.coordinator.snapshot_window_secs > 0,
            "coordinator.snapshot_window_secs must be > 0",
        );

        let e = &self.engines;
        check(
            e.pattern.eps > 0.0 && e.pattern.eps <= 2.0,
            "engines.pattern.eps must be in (0, 2]",
        );
        check(e.pattern.min_samples >= 2, "engines.pattern.min_samples must be >= 2");
        check(
            e.contradiction.threshold > 0.0 && e.contradiction.threshold <= 1.0,
            "engines.contradiction.threshold must be in (0, 1]",
        );
        check(
            e.contradiction.min_passages >= 2,
            "engines.contradiction.min_passages must be >= 2",
        );
        check(e.contradiction.max_pairs > 0, "engines.contradiction.max_pairs must be > 0");
        check(
            e.gap.weak_coverage > 0.0 && e.gap.weak_coverage <= 1.0,
            "engines.gap.weak_coverage must be in (0, 1]",
        );
        check(
            e.connection.min_shared_references > 0,
            "engines.connection.min_shared_references must be > 0",
        );
        check(
            e.connection.min_region_size > 0,
            "engines.connection.min_region_size must be > 0",
        );
        check(e.trend.min_snapshots >= 3, "engines.trend.min_snapshots must be >= 3");
        check(
            e.trend.max_snapshots >= e.trend.min_snapshots,
            "engines.trend.max_snapshots must be >= min_snapshots",
        );
        check(
            e.trend.min_consistency > 0.0 && e.trend.min_consistency <= 1.0,
            "engines.trend.min_consistency must be in (0, 1]",
        );
        check(e.anomaly.trees > 0, "engines.anomaly.trees must be > 0");
        check(e.anomaly.sample_size >= 2, "engines.anomaly.sample_size must be >= 2");
        check(
            e.anomaly.threshold > 0.0 && e.anomaly.threshold < 1.0,
            "engines.anomaly.threshold must be in (0, 1)",
        );

        if let EmbeddingBackend::Hashing { dimension } = self.resources.embedding {
            check(dimension > 0, "resources.embedding.dimension must be > 0");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Default config location (`~/.config/discovery-engine/config.yaml` on Linux).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("discovery-engine")
        .join("config.yaml")
}
