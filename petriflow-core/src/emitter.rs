//! Emitters: output signals of a node.

use serde::{Deserialize, Serialize};

use crate::{
    id::{DetectorId, EmitterId, NodeId},
    node::Branch,
};

/// How an emitter reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmitterKind {
    /// Trigger the target detector only.
    #[default]
    Simple,
    /// Activate the node owning the target detector, then trigger it.
    Activation,
}

/// An emitter owned by a node.
#[derive(Debug, Clone)]
pub struct Emitter {
    id: EmitterId,
    owner: NodeId,
    branch: Branch,
    kind: EmitterKind,
    name: Option<String>,
    target: Option<DetectorId>,
    var_name: Option<String>,
    emitted: bool,
}

impl Emitter {
    pub(crate) fn new(id: EmitterId, owner: NodeId, branch: Branch, kind: EmitterKind) -> Self {
        Self {
            id,
            owner,
            branch,
            kind,
            name: None,
            target: None,
            var_name: None,
            emitted: false,
        }
    }

    pub fn id(&self) -> EmitterId {
        self.id
    }

    /// Node this emitter belongs to.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Branch of the owning node this emitter fires on.
    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn kind(&self) -> EmitterKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn target_detector(&self) -> Option<DetectorId> {
        self.target
    }

    /// Variable copied from the owning node's scope into the instance store.
    pub fn var_name(&self) -> Option<&str> {
        self.var_name.as_deref()
    }

    /// Whether the emitter has fired at least once.
    pub fn activated(&self) -> bool {
        self.emitted
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub(crate) fn set_target(&mut self, target: DetectorId) {
        self.target = Some(target);
    }

    pub(crate) fn set_var_name(&mut self, var_name: impl Into<String>) {
        self.var_name = Some(var_name.into());
    }

    pub(crate) fn mark_emitted(&mut self) {
        self.emitted = true;
    }
}
