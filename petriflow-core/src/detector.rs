//! Detectors: input guards of a node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{DetectorId, NodeId};

/// The kinds of detector the engine knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorKind {
    /// Satisfied by any trigger.
    Simple,
    /// Listens for an application event while its node is active.
    ///
    /// Delivered through [`Workflow::handle_event`](crate::workflow::Workflow::handle_event);
    /// events arriving while the node is inactive are ignored.
    Event {
        event_type: String,
        event_name: String,
    },
}

impl DetectorKind {
    /// Shorthand for an event detector.
    pub fn event(event_type: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self::Event {
            event_type: event_type.into(),
            event_name: event_name.into(),
        }
    }
}

/// A detector owned by a node.
///
/// Satisfaction is recorded whether or not the owning node is active, so an
/// upstream emitter may fire before or after the node itself is activated.
/// Deactivating the owning node consumes the satisfaction.
#[derive(Debug, Clone)]
pub struct Detector {
    id: DetectorId,
    owner: NodeId,
    kind: DetectorKind,
    name: Option<String>,
    satisfied: bool,
    listening: bool,
    last_payload: Option<Value>,
}

impl Detector {
    pub(crate) fn new(id: DetectorId, owner: NodeId, kind: DetectorKind) -> Self {
        Self {
            id,
            owner,
            kind,
            name: None,
            satisfied: false,
            listening: false,
            last_payload: None,
        }
    }

    pub fn id(&self) -> DetectorId {
        self.id
    }

    /// Node this detector belongs to.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn kind(&self) -> &DetectorKind {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Whether the detector's condition has been observed.
    pub fn detector_state(&self) -> bool {
        self.satisfied
    }

    /// Whether the detector is armed, i.e. its node is active.
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Payload of the most recent trigger.
    pub fn last_payload(&self) -> Option<&Value> {
        self.last_payload.as_ref()
    }

    /// True if an event with this type and name should trigger the detector.
    pub fn listens_for(&self, event_type: &str, event_name: &str) -> bool {
        match &self.kind {
            DetectorKind::Event {
                event_type: ty,
                event_name: name,
            } => self.listening && ty == event_type && name == event_name,
            DetectorKind::Simple => false,
        }
    }

    pub(crate) fn on_activate(&mut self) {
        self.listening = true;
    }

    pub(crate) fn on_deactivate(&mut self) {
        self.listening = false;
        self.satisfied = false;
    }

    /// Record a trigger. Returns true only on the unsatisfied to satisfied
    /// edge, which is when the owning node must be notified.
    pub(crate) fn record_trigger(&mut self, payload: Value) -> bool {
        self.last_payload = Some(payload);
        if self.satisfied {
            return false;
        }
        self.satisfied = true;
        true
    }

    /// Read-only view handed to decision predicates.
    pub fn snapshot(&self) -> DetectorSnapshot {
        DetectorSnapshot {
            id: self.id,
            name: self.name.clone(),
            satisfied: self.satisfied,
        }
    }
}

/// Read-only detector state, in the node's registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorSnapshot {
    pub id: DetectorId,
    pub name: Option<String>,
    pub satisfied: bool,
}

impl DetectorSnapshot {
    pub fn detector_state(&self) -> bool {
        self.satisfied
    }
}
