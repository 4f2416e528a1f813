//! Arena handles for workflow elements.
//!
//! Every cross-reference inside a workflow graph (detector to owning node,
//! emitter to target detector, ...) is one of these handles. The
//! [`Workflow`](crate::workflow::Workflow) owns the arenas they index into.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(usize);

        impl $name {
            /// Build a handle from a raw arena index.
            pub fn from_index(index: usize) -> Self {
                Self(index)
            }

            /// Raw arena index of this handle.
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle to a node.
    NodeId,
    "node"
);
arena_id!(
    /// Handle to a detector.
    DetectorId,
    "detector"
);
arena_id!(
    /// Handle to an emitter.
    EmitterId,
    "emitter"
);
arena_id!(
    /// Handle to an activity.
    ActivityId,
    "activity"
);
