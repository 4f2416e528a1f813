//! # petriflow
//!
//! A petri-net style workflow engine. A workflow instance is a graph of
//! nodes wired together by emitter/detector pairs; activation (a token)
//! flows through the graph synchronously, depth first.
//!
//! ## Core Concepts
//!
//! - **Node**: holds detectors (inputs), activities and emitters (outputs).
//!   Basic nodes transition once every detector is satisfied; conditional
//!   nodes pick a `Then` or `Else` set with a [`DecisionPredicate`].
//! - **Detector**: input guard, satisfied by a trigger
//! - **Emitter**: output signal that triggers a detector downstream and can
//!   carry a variable along
//! - **Activity**: side effect run once per transition
//! - **Workflow**: owns the graph and the instance variables
//!
//! ## Quick Start
//!
//! ```rust
//! use petriflow_core::prelude::*;
//!
//! let mut workflow = Workflow::new("signal");
//! let start = workflow.add_node("StartEvent_1").unwrap();
//! let end = workflow.add_node("EndEvent_1").unwrap();
//! workflow
//!     .add_activity(end, EventRaisingActivity::new("Course", "UserLeft"))
//!     .unwrap();
//! workflow.connect(start, end, EmitterKind::Activation).unwrap();
//! workflow.set_start_node(start).unwrap();
//!
//! let report = workflow.start().unwrap();
//! assert_eq!(report.fired_nodes(), vec!["StartEvent_1", "EndEvent_1"]);
//! assert_eq!(workflow.take_raised_events().len(), 1);
//! ```
//!
//! [`DecisionPredicate`]: crate::node::DecisionPredicate

pub mod activity;
pub mod config;
pub mod detector;
pub mod emitter;
pub mod error;
pub mod id;
mod log;
pub mod node;
pub mod report;
pub mod vars;
pub mod workflow;

#[cfg(test)]
mod propagation_test;

/// Convenient re-exports for common use.
pub mod prelude {
    pub use eyre;
    pub use serde::{Deserialize, Serialize};

    #[cfg(feature = "tracing")]
    pub use crate::activity::LoggingActivity;

    pub use crate::{
        activity::{
            Activity, ActivityContext, AssignVariableActivity, EventRaisingActivity, RaisedEvent,
            ScriptActivity,
        },
        config::EngineConfig,
        detector::{Detector, DetectorKind, DetectorSnapshot},
        emitter::{Emitter, EmitterKind},
        error::{FlowError, Result},
        id::{ActivityId, DetectorId, EmitterId, NodeId},
        node::{
            Always, Branch, Decision, DecisionPredicate, FirstOf, FnPredicate, Node, NodeHook,
            helpers,
        },
        report::{ActivityFailure, TransitionOutcome, TransitionRecord, WaveReport},
        vars::{RuntimeVars, VariableDefinition},
        workflow::{Workflow, WorkflowBuilder},
    };
}
