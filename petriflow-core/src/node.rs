//! Node abstraction for petriflow workflows.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::{
    detector::DetectorSnapshot,
    id::{ActivityId, DetectorId, EmitterId, NodeId},
    log::warn,
    vars::RuntimeVars,
};

/// Which set of activities and emitters a transition runs.
///
/// Basic nodes only have a `Then` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    Then,
    Else,
}

impl Branch {
    pub fn as_str(self) -> &'static str {
        match self {
            Branch::Then => "then",
            Branch::Else => "else",
        }
    }
}

/// Tri-state outcome of a branch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Then,
    Else,
    /// No decision is possible with the current detector states.
    Pending,
}

impl Decision {
    /// Branch to run, or `None` while pending.
    pub fn branch(self) -> Option<Branch> {
        match self {
            Decision::Then => Some(Branch::Then),
            Decision::Else => Some(Branch::Else),
            Decision::Pending => None,
        }
    }
}

impl From<Option<bool>> for Decision {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Decision::Then,
            Some(false) => Decision::Else,
            None => Decision::Pending,
        }
    }
}

/// Trait for conditional-node branch predicates.
///
/// Implementations must be pure with respect to the detector states: two
/// calls with the same snapshots give the same decision. An error is treated
/// as [`Decision::Pending`] by the engine.
pub trait DecisionPredicate: Send + Debug {
    /// Decide which branch to run from the node's detectors, in registration
    /// order.
    fn decide(&self, detectors: &[DetectorSnapshot]) -> eyre::Result<Decision>;

    /// Get the name of this predicate for debugging/logging.
    fn name(&self) -> String {
        format!("{self:?}")
    }
}

/// A predicate that wraps a closure.
pub struct FnPredicate<F>
where
    F: Fn(&[DetectorSnapshot]) -> eyre::Result<Decision> + Send,
{
    func: F,
    name: String,
}

impl<F> Debug for FnPredicate<F>
where
    F: Fn(&[DetectorSnapshot]) -> eyre::Result<Decision> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPredicate")
            .field("name", &self.name)
            .finish()
    }
}

impl<F> FnPredicate<F>
where
    F: Fn(&[DetectorSnapshot]) -> eyre::Result<Decision> + Send,
{
    /// Create a new closure predicate.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            func,
            name: name.into(),
        }
    }
}

impl<F> DecisionPredicate for FnPredicate<F>
where
    F: Fn(&[DetectorSnapshot]) -> eyre::Result<Decision> + Send,
{
    fn decide(&self, detectors: &[DetectorSnapshot]) -> eyre::Result<Decision> {
        (self.func)(detectors)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// A predicate that always returns the same decision.
#[derive(Debug, Clone, Copy)]
pub struct Always(pub Decision);

impl DecisionPredicate for Always {
    fn decide(&self, _detectors: &[DetectorSnapshot]) -> eyre::Result<Decision> {
        Ok(self.0)
    }
}

/// Decides `Then` when only the first detector is satisfied and `Else` when
/// only the second one is. Both or neither leave the decision pending.
///
/// This is the usual "which of two events came first" race.
#[derive(Debug, Clone, Copy)]
pub struct FirstOf {
    pub then_detector: usize,
    pub else_detector: usize,
}

impl DecisionPredicate for FirstOf {
    fn decide(&self, detectors: &[DetectorSnapshot]) -> eyre::Result<Decision> {
        let state = |index: usize| {
            detectors
                .get(index)
                .map(DetectorSnapshot::detector_state)
                .ok_or_else(|| eyre::eyre!("node has no detector at position {index}"))
        };
        let decision = match (state(self.then_detector)?, state(self.else_detector)?) {
            (true, false) => Decision::Then,
            (false, true) => Decision::Else,
            _ => Decision::Pending,
        };
        Ok(decision)
    }
}

/// Hooks run on a node's activation lifecycle.
pub trait NodeHook: Send + Debug {
    fn on_activate(&mut self, node: &str, vars: &mut RuntimeVars) {
        let _ = (node, vars);
    }

    fn on_deactivate(&mut self, node: &str, vars: &mut RuntimeVars) {
        let _ = (node, vars);
    }
}

/// Activities and emitters that run together on one branch.
#[derive(Debug, Clone, Default)]
pub struct BranchSet {
    pub(crate) activities: Vec<ActivityId>,
    pub(crate) emitters: Vec<EmitterId>,
}

impl BranchSet {
    pub fn activities(&self) -> &[ActivityId] {
        &self.activities
    }

    pub fn emitters(&self) -> &[EmitterId] {
        &self.emitters
    }
}

/// Node variants.
#[derive(Debug)]
pub enum NodeKind {
    /// Transitions once every detector is satisfied.
    Basic,
    /// Transitions along the branch chosen by its predicate.
    Conditional {
        predicate: Box<dyn DecisionPredicate>,
        otherwise: BranchSet,
    },
}

/// A node of the workflow graph.
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) active: bool,
    pub(crate) detectors: Vec<DetectorId>,
    pub(crate) then: BranchSet,
    pub(crate) kind: NodeKind,
    pub(crate) vars: RuntimeVars,
    pub(crate) hook: Option<Box<dyn NodeHook>>,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, kind: NodeKind) -> Self {
        Self {
            id,
            name,
            active: false,
            detectors: Vec::new(),
            then: BranchSet::default(),
            kind,
            vars: RuntimeVars::new(),
            hook: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.kind, NodeKind::Conditional { .. })
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Detectors in registration order.
    pub fn detectors(&self) -> &[DetectorId] {
        &self.detectors
    }

    /// Activities and emitters of a branch; `None` for `Else` on a basic node.
    pub fn branch(&self, branch: Branch) -> Option<&BranchSet> {
        match (branch, &self.kind) {
            (Branch::Then, _) => Some(&self.then),
            (Branch::Else, NodeKind::Conditional { otherwise, .. }) => Some(otherwise),
            (Branch::Else, NodeKind::Basic) => None,
        }
    }

    pub(crate) fn branch_mut(&mut self, branch: Branch) -> Option<&mut BranchSet> {
        match (branch, &mut self.kind) {
            (Branch::Then, _) => Some(&mut self.then),
            (Branch::Else, NodeKind::Conditional { otherwise, .. }) => Some(otherwise),
            (Branch::Else, NodeKind::Basic) => None,
        }
    }

    /// Variables scoped to this node.
    pub fn vars(&self) -> &RuntimeVars {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut RuntimeVars {
        &mut self.vars
    }

    /// Evaluate the transition condition once.
    pub(crate) fn decide(&self, detectors: &[DetectorSnapshot]) -> Decision {
        match &self.kind {
            NodeKind::Basic => {
                if detectors.iter().all(DetectorSnapshot::detector_state) {
                    Decision::Then
                } else {
                    Decision::Pending
                }
            }
            NodeKind::Conditional { predicate, .. } => match predicate.decide(detectors) {
                Ok(decision) => decision,
                Err(error) => {
                    warn!(
                        node = %self.name,
                        predicate = %predicate.name(),
                        %error,
                        "decision predicate failed, treating as pending"
                    );
                    Decision::Pending
                }
            },
        }
    }

    pub(crate) fn run_activate_hook(&mut self) {
        if let Some(hook) = self.hook.as_mut() {
            hook.on_activate(&self.name, &mut self.vars);
        }
    }

    pub(crate) fn run_deactivate_hook(&mut self) {
        if let Some(hook) = self.hook.as_mut() {
            hook.on_deactivate(&self.name, &mut self.vars);
        }
    }
}

/// Helper functions for creating common predicates.
pub mod helpers {
    use super::*;

    /// Create a predicate from a closure.
    pub fn predicate<F>(name: impl Into<String>, f: F) -> FnPredicate<F>
    where
        F: Fn(&[DetectorSnapshot]) -> eyre::Result<Decision> + Send,
    {
        FnPredicate::new(name, f)
    }

    /// Create a predicate that always returns `decision`.
    pub fn always(decision: Decision) -> Always {
        Always(decision)
    }

    /// Create a "first of two detectors" race predicate.
    pub fn first_of(then_detector: usize, else_detector: usize) -> FirstOf {
        FirstOf {
            then_detector,
            else_detector,
        }
    }
}
