//! Error types for petriflow.

use thiserror::Error;

use crate::id::{ActivityId, DetectorId, EmitterId, NodeId};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Error types that can occur while building or running a workflow.
///
/// Conditions the engine treats as ordinary outcomes (a transition attempted
/// on an inactive node, a detector triggered twice, a failing activity) are
/// never reported through this type.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Graph construction error.
    #[error("Construction error: {0}")]
    Construction(String),

    /// Node handle does not belong to this workflow.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Detector handle does not belong to this workflow.
    #[error("Unknown detector: {0}")]
    UnknownDetector(DetectorId),

    /// Emitter handle does not belong to this workflow.
    #[error("Unknown emitter: {0}")]
    UnknownEmitter(EmitterId),

    /// Activity handle does not belong to this workflow.
    #[error("Unknown activity: {0}")]
    UnknownActivity(ActivityId),

    /// A propagation wave recursed deeper than the configured limit.
    ///
    /// Almost always caused by a cycle in the graph where a node's own
    /// emitters eventually re-trigger one of its detectors.
    #[error("Propagation overflow at depth {depth} while entering node '{node}'")]
    PropagationOverflow {
        /// Depth at which the guard tripped
        depth: usize,
        /// Name of the node being entered
        node: String,
    },

    /// Runtime variable access error.
    #[error("Variable error: {0}")]
    Variable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error.
    #[error("Error: {0}")]
    Generic(#[from] eyre::Report),
}

impl FlowError {
    /// Create a new construction error.
    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    /// Create a new variable error.
    pub fn variable(msg: impl Into<String>) -> Self {
        Self::Variable(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new propagation overflow error.
    pub fn overflow(depth: usize, node: impl Into<String>) -> Self {
        Self::PropagationOverflow {
            depth,
            node: node.into(),
        }
    }

    /// Returns true if this error was raised by the recursion guard.
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::PropagationOverflow { .. })
    }
}
