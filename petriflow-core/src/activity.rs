//! Activities: side effects bound to a node transition.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
#[cfg(feature = "tracing")]
use tracing::Level;

use crate::{id::NodeId, log::debug, vars::RuntimeVars};

/// Trait for workflow activities.
///
/// An activity is run once each time its node transitions along the branch
/// it was registered on. Returning an error marks the activity as failed in
/// the wave report; it never aborts the transition.
pub trait Activity: Send + Debug {
    /// Execute the activity.
    fn execute(&mut self, context: &mut ActivityContext<'_>) -> eyre::Result<()>;

    /// Get the name of this activity for debugging/logging.
    fn name(&self) -> String {
        format!("{self:?}")
    }
}

/// An event raised by an activity, collected in the workflow outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedEvent {
    pub event_type: String,
    pub event_name: String,
    /// Name of the node whose activity raised the event.
    pub source: String,
    pub raised_at: DateTime<Utc>,
}

/// What an activity can see and touch while it runs.
pub struct ActivityContext<'a> {
    node: NodeId,
    node_name: &'a str,
    node_vars: &'a mut RuntimeVars,
    instance_vars: &'a RuntimeVars,
    outbox: &'a mut Vec<RaisedEvent>,
}

impl<'a> ActivityContext<'a> {
    pub(crate) fn new(
        node: NodeId,
        node_name: &'a str,
        node_vars: &'a mut RuntimeVars,
        instance_vars: &'a RuntimeVars,
        outbox: &'a mut Vec<RaisedEvent>,
    ) -> Self {
        Self {
            node,
            node_name,
            node_vars,
            instance_vars,
            outbox,
        }
    }

    /// Handle of the node being transitioned.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Name of the node being transitioned.
    pub fn node_name(&self) -> &str {
        self.node_name
    }

    /// Variables scoped to the owning node.
    pub fn node_vars(&self) -> &RuntimeVars {
        self.node_vars
    }

    /// Mutable variables scoped to the owning node.
    ///
    /// Data emitters copy from this scope into the instance store.
    pub fn node_vars_mut(&mut self) -> &mut RuntimeVars {
        self.node_vars
    }

    /// Variables shared by the whole workflow instance.
    pub fn instance_vars(&self) -> &RuntimeVars {
        self.instance_vars
    }

    /// Queue an event in the workflow outbox.
    pub fn raise_event(&mut self, event_type: impl Into<String>, event_name: impl Into<String>) {
        self.outbox.push(RaisedEvent {
            event_type: event_type.into(),
            event_name: event_name.into(),
            source: self.node_name.to_string(),
            raised_at: Utc::now(),
        });
    }
}

/// Activity that runs a caller-supplied closure.
pub struct ScriptActivity<F>
where
    F: FnMut(&mut ActivityContext<'_>) -> eyre::Result<()> + Send,
{
    script: F,
    name: String,
}

impl<F> Debug for ScriptActivity<F>
where
    F: FnMut(&mut ActivityContext<'_>) -> eyre::Result<()> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptActivity")
            .field("name", &self.name)
            .finish()
    }
}

impl<F> ScriptActivity<F>
where
    F: FnMut(&mut ActivityContext<'_>) -> eyre::Result<()> + Send,
{
    /// Create a new script activity.
    pub fn new(name: impl Into<String>, script: F) -> Self {
        Self {
            script,
            name: name.into(),
        }
    }
}

impl<F> Activity for ScriptActivity<F>
where
    F: FnMut(&mut ActivityContext<'_>) -> eyre::Result<()> + Send,
{
    fn execute(&mut self, context: &mut ActivityContext<'_>) -> eyre::Result<()> {
        (self.script)(context)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Activity that raises an application event.
#[derive(Debug, Clone)]
pub struct EventRaisingActivity {
    event_type: String,
    event_name: String,
}

impl EventRaisingActivity {
    /// Create a new event-raising activity.
    pub fn new(event_type: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_name: event_name.into(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }
}

impl Activity for EventRaisingActivity {
    fn execute(&mut self, context: &mut ActivityContext<'_>) -> eyre::Result<()> {
        debug!(
            node = context.node_name(),
            event_type = %self.event_type,
            event_name = %self.event_name,
            "raising event"
        );
        context.raise_event(self.event_type.clone(), self.event_name.clone());
        Ok(())
    }

    fn name(&self) -> String {
        format!("raise:{}/{}", self.event_type, self.event_name)
    }
}

/// Activity that writes a fixed value into the node scope.
#[derive(Debug, Clone)]
pub struct AssignVariableActivity {
    var_name: String,
    value: Value,
}

impl AssignVariableActivity {
    /// Create a new assignment of `value` to `var_name`.
    pub fn new(var_name: impl Into<String>, value: Value) -> Self {
        Self {
            var_name: var_name.into(),
            value,
        }
    }
}

impl Activity for AssignVariableActivity {
    fn execute(&mut self, context: &mut ActivityContext<'_>) -> eyre::Result<()> {
        context
            .node_vars_mut()
            .set_raw(self.var_name.clone(), self.value.clone());
        Ok(())
    }

    fn name(&self) -> String {
        format!("assign:{}", self.var_name)
    }
}

/// Activity that writes a message to the log.
#[cfg(feature = "tracing")]
#[derive(Debug, Clone)]
pub struct LoggingActivity {
    message: String,
    level: Level,
}

#[cfg(feature = "tracing")]
impl LoggingActivity {
    /// Log `message` at info level.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Level::INFO,
        }
    }

    /// Set the level the message is logged at.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

#[cfg(feature = "tracing")]
impl Activity for LoggingActivity {
    fn execute(&mut self, context: &mut ActivityContext<'_>) -> eyre::Result<()> {
        let node = context.node_name();
        let message = self.message.as_str();
        if self.level == Level::ERROR {
            tracing::error!(node, "{message}");
        } else if self.level == Level::WARN {
            tracing::warn!(node, "{message}");
        } else if self.level == Level::INFO {
            tracing::info!(node, "{message}");
        } else if self.level == Level::DEBUG {
            tracing::debug!(node, "{message}");
        } else {
            tracing::trace!(node, "{message}");
        }
        Ok(())
    }

    fn name(&self) -> String {
        "log".to_string()
    }
}
