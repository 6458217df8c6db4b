//! Engine configuration.
//!
//! `DatabaseConfig` is the single knob surface for opening an engine
//! instance: log location, payload mode (a present dimension selects
//! vector mode), distance metric, and the optional consensus register.

use crate::types::{DistanceMetric, EngineMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default log file name when none is given.
pub const DEFAULT_LOG_FILE: &str = "ember.log";

/// Configuration for a database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the append-only log file.
    pub log_path: PathBuf,

    /// Vector dimension. `Some(d)` selects vector mode; `None` selects
    /// text mode.
    pub dimension: Option<usize>,

    /// Distance metric used by the vector index.
    pub metric: DistanceMetric,

    /// Consensus node id. `Some(id)` enables the CASPaxos register.
    pub node_id: Option<u32>,

    /// Replica addresses for the consensus register. The quorum size is
    /// computed over `replicas.len() + 1` (self included).
    pub replicas: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            log_path: PathBuf::from(DEFAULT_LOG_FILE),
            dimension: None,
            metric: DistanceMetric::Euclidean,
            node_id: None,
            replicas: Vec::new(),
        }
    }
}

impl DatabaseConfig {
    /// Text-mode configuration with the given log path.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        DatabaseConfig {
            log_path: log_path.into(),
            ..Default::default()
        }
    }

    /// Select vector mode with the given dimension (builder pattern).
    pub fn with_dimension(mut self, dim: usize) -> Self {
        self.dimension = Some(dim);
        self
    }

    /// Set the distance metric (builder pattern).
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Enable the consensus register with the given node id (builder
    /// pattern).
    pub fn with_consensus(mut self, node_id: u32) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the consensus replica list (builder pattern).
    pub fn with_replicas(mut self, replicas: Vec<String>) -> Self {
        self.replicas = replicas;
        self
    }

    /// The engine mode this configuration selects.
    pub fn mode(&self) -> EngineMode {
        match self.dimension {
            Some(dim) => EngineMode::Vector { dim },
            None => EngineMode::Text,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == Some(0) {
            return Err(ConfigError::ZeroDimension);
        }
        if !self.replicas.is_empty() && self.node_id.is_none() {
            return Err(ConfigError::ReplicasWithoutNodeId);
        }
        Ok(())
    }

    /// Text-mode configuration rooted in a test directory.
    pub fn for_testing(dir: &Path) -> Self {
        DatabaseConfig::new(dir.join(DEFAULT_LOG_FILE))
    }
}

/// Configuration validation errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Vector mode with dimension 0 is meaningless.
    #[error("vector dimension must be at least 1")]
    ZeroDimension,

    /// Replica addresses require a node id for ballot ordering.
    #[error("consensus replicas configured without a node id")]
    ReplicasWithoutNodeId,
}
