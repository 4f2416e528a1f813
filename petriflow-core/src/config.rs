//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Default bound on the recursion depth of one propagation wave.
pub const DEFAULT_MAX_PROPAGATION_DEPTH: usize = 256;

/// Tunables for a workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of nested node entries in a single propagation wave.
    ///
    /// Each emitter firing into a downstream node counts as one level.
    pub max_propagation_depth: usize,
    /// Whether successful transitions are recorded in the wave report.
    pub record_transitions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_propagation_depth: DEFAULT_MAX_PROPAGATION_DEPTH,
            record_transitions: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum propagation depth.
    pub fn with_max_propagation_depth(mut self, depth: usize) -> Self {
        self.max_propagation_depth = depth;
        self
    }

    /// Enable or disable transition recording.
    pub fn with_record_transitions(mut self, record: bool) -> Self {
        self.record_transitions = record;
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_propagation_depth == 0 {
            return Err(FlowError::config("max_propagation_depth must be at least 1"));
        }
        Ok(())
    }
}
