//! Outcomes of propagation waves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    id::{ActivityId, NodeId},
    node::Branch,
};

/// One successful node transition inside a wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub node: NodeId,
    pub node_name: String,
    pub branch: Branch,
    /// Nesting depth of the transition; the node that received the external
    /// stimulus transitions at depth 0.
    pub depth: usize,
    pub timestamp: DateTime<Utc>,
}

/// An activity that returned an error during a transition.
///
/// Failures never stop the transition; the remaining activities and the
/// emitters of the branch still run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFailure {
    pub node: NodeId,
    pub node_name: String,
    pub activity: ActivityId,
    pub activity_name: String,
    pub message: String,
}

/// Everything that happened during one propagation wave.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveReport {
    /// Transitions in the order they fired.
    pub transitions: Vec<TransitionRecord>,
    /// Activity failures in the order they occurred.
    pub failures: Vec<ActivityFailure>,
    /// Deepest nesting level reached.
    pub depth_reached: usize,
}

impl WaveReport {
    /// True when no activity failed during the wave.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the nodes that transitioned, in firing order.
    pub fn fired_nodes(&self) -> Vec<&str> {
        self.transitions
            .iter()
            .map(|record| record.node_name.as_str())
            .collect()
    }

    /// Whether the given node transitioned during the wave.
    pub fn fired(&self, node: NodeId) -> bool {
        self.transitions.iter().any(|record| record.node == node)
    }
}

/// Result of an explicit transition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The node is inactive, or its detectors do not yet allow a decision.
    NotReady,
    /// The node transitioned along `branch`.
    Fired {
        branch: Branch,
        report: WaveReport,
    },
}

impl TransitionOutcome {
    /// True if the node transitioned.
    pub fn is_fired(&self) -> bool {
        matches!(self, Self::Fired { .. })
    }

    /// Branch taken, if the node transitioned.
    pub fn branch(&self) -> Option<Branch> {
        match self {
            Self::Fired { branch, .. } => Some(*branch),
            Self::NotReady => None,
        }
    }

    /// Wave report, if the node transitioned.
    pub fn report(&self) -> Option<&WaveReport> {
        match self {
            Self::Fired { report, .. } => Some(report),
            Self::NotReady => None,
        }
    }
}
