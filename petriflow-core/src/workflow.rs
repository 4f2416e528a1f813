//! Workflow graph container and the propagation engine.
//!
//! A [`Workflow`] owns every node, detector, emitter and activity of one
//! process instance in flat arenas. Elements refer to each other only through
//! the handles in [`crate::id`].
//!
//! Propagation is synchronous and depth-first: activating a node arms its
//! detectors and attempts a transition; a transition runs the branch's
//! activities and then its emitters, and each emitter triggers a detector on
//! a downstream node, which re-evaluates its own transition before control
//! returns. One external stimulus (start, activate, trigger, event) produces
//! one wave, summarized in a [`WaveReport`].

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    activity::{Activity, ActivityContext, RaisedEvent},
    config::EngineConfig,
    detector::{Detector, DetectorKind, DetectorSnapshot},
    emitter::{Emitter, EmitterKind},
    error::{FlowError, Result},
    id::{ActivityId, DetectorId, EmitterId, NodeId},
    log::{debug, error, info, trace, warn},
    node::{Always, Branch, Decision, DecisionPredicate, Node, NodeHook, NodeKind},
    report::{ActivityFailure, TransitionOutcome, TransitionRecord, WaveReport},
    vars::{RuntimeVars, VariableDefinition},
};

struct ActivityEntry {
    owner: NodeId,
    activity: Box<dyn Activity>,
}

/// Bookkeeping for one propagation wave.
struct Wave {
    depth: usize,
    max_depth: usize,
    record_transitions: bool,
    report: WaveReport,
}

impl Wave {
    fn new(config: &EngineConfig) -> Self {
        Self {
            depth: 0,
            max_depth: config.max_propagation_depth,
            record_transitions: config.record_transitions,
            report: WaveReport::default(),
        }
    }

    /// Enter a downstream node, failing once the depth limit is exceeded.
    fn descend(&mut self, node: &str) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            error!(depth = self.depth, node, "propagation depth limit exceeded");
            #[cfg(feature = "metrics")]
            metrics::counter!("petriflow_propagation_overflows_total").increment(1);
            return Err(FlowError::overflow(self.depth, node));
        }
        self.report.depth_reached = self.report.depth_reached.max(self.depth);
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn finish(self) -> WaveReport {
        self.report
    }
}

/// A workflow instance: the graph plus its runtime state.
pub struct Workflow {
    name: String,
    config: EngineConfig,
    nodes: Vec<Node>,
    node_index: HashMap<String, NodeId>,
    detectors: Vec<Detector>,
    emitters: Vec<Emitter>,
    activities: Vec<ActivityEntry>,
    vars: RuntimeVars,
    start: Option<NodeId>,
    outbox: Vec<RaisedEvent>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("detectors", &self.detectors.len())
            .field("emitters", &self.emitters.len())
            .field("activities", &self.activities.len())
            .field("start", &self.start)
            .finish()
    }
}

impl Workflow {
    /// Create an empty workflow with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_parts(name.into(), EngineConfig::default(), RuntimeVars::new())
    }

    /// Create a new workflow builder.
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    fn with_parts(name: String, config: EngineConfig, vars: RuntimeVars) -> Self {
        Self {
            name,
            config,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            detectors: Vec::new(),
            emitters: Vec::new(),
            activities: Vec::new(),
            vars,
            start: None,
            outbox: Vec::new(),
        }
    }

    /// Get the workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add a basic node.
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<NodeId> {
        self.insert_node(name.into(), NodeKind::Basic)
    }

    /// Add a conditional node deciding its branch with `predicate`.
    pub fn add_conditional_node(
        &mut self,
        name: impl Into<String>,
        predicate: impl DecisionPredicate + 'static,
    ) -> Result<NodeId> {
        self.insert_node(
            name.into(),
            NodeKind::Conditional {
                predicate: Box::new(predicate),
                otherwise: Default::default(),
            },
        )
    }

    /// Add a conditional node that takes the `Then` branch until a predicate
    /// is set with [`set_evaluation`](Self::set_evaluation).
    pub fn add_default_conditional_node(&mut self, name: impl Into<String>) -> Result<NodeId> {
        self.add_conditional_node(name, Always(Decision::Then))
    }

    fn insert_node(&mut self, name: String, kind: NodeKind) -> Result<NodeId> {
        if self.node_index.contains_key(&name) {
            return Err(FlowError::construction(format!(
                "node '{name}' already exists in workflow '{}'",
                self.name
            )));
        }
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(Node::new(id, name.clone(), kind));
        self.node_index.insert(name, id);
        Ok(id)
    }

    /// Replace the predicate of a conditional node.
    pub fn set_evaluation(
        &mut self,
        node: NodeId,
        predicate: impl DecisionPredicate + 'static,
    ) -> Result<()> {
        let entry = self.node_mut(node)?;
        match &mut entry.kind {
            NodeKind::Conditional { predicate: slot, .. } => {
                *slot = Box::new(predicate);
                Ok(())
            }
            NodeKind::Basic => Err(FlowError::construction(format!(
                "node '{}' is not conditional",
                entry.name
            ))),
        }
    }

    /// Install lifecycle hooks on a node.
    pub fn set_node_hook(&mut self, node: NodeId, hook: impl NodeHook + 'static) -> Result<()> {
        self.node_mut(node)?.hook = Some(Box::new(hook));
        Ok(())
    }

    /// Add a detector to a node. Detectors are evaluated in the order added.
    pub fn add_detector(&mut self, node: NodeId, kind: DetectorKind) -> Result<DetectorId> {
        self.node(node)?;
        let id = self.register_detector(node, kind);
        self.nodes[node.index()].detectors.push(id);
        Ok(id)
    }

    /// Record a detector in the global registry.
    fn register_detector(&mut self, owner: NodeId, kind: DetectorKind) -> DetectorId {
        let id = DetectorId::from_index(self.detectors.len());
        self.detectors.push(Detector::new(id, owner, kind));
        trace!(detector = %id, node = %owner, "registered detector");
        id
    }

    pub fn set_detector_name(
        &mut self,
        detector: DetectorId,
        name: impl Into<String>,
    ) -> Result<()> {
        self.detector_mut(detector)?.set_name(name);
        Ok(())
    }

    /// Add an activity to the `Then` set of a node.
    pub fn add_activity(
        &mut self,
        node: NodeId,
        activity: impl Activity + 'static,
    ) -> Result<ActivityId> {
        self.add_activity_to(node, Branch::Then, activity)
    }

    /// Add an activity to a branch of a node.
    pub fn add_activity_to(
        &mut self,
        node: NodeId,
        branch: Branch,
        activity: impl Activity + 'static,
    ) -> Result<ActivityId> {
        let id = ActivityId::from_index(self.activities.len());
        self.branch_mut(node, branch)?.activities.push(id);
        self.activities.push(ActivityEntry {
            owner: node,
            activity: Box::new(activity),
        });
        Ok(id)
    }

    /// Add an emitter to the `Then` set of a node.
    pub fn add_emitter(&mut self, node: NodeId, kind: EmitterKind) -> Result<EmitterId> {
        self.add_emitter_to(node, Branch::Then, kind)
    }

    /// Add an emitter to a branch of a node.
    pub fn add_emitter_to(
        &mut self,
        node: NodeId,
        branch: Branch,
        kind: EmitterKind,
    ) -> Result<EmitterId> {
        let id = EmitterId::from_index(self.emitters.len());
        self.branch_mut(node, branch)?.emitters.push(id);
        self.emitters.push(Emitter::new(id, node, branch, kind));
        Ok(id)
    }

    /// Point an emitter at the detector it triggers.
    pub fn set_target_detector(&mut self, emitter: EmitterId, detector: DetectorId) -> Result<()> {
        self.detector(detector)?;
        self.emitter_mut(emitter)?.set_target(detector);
        Ok(())
    }

    /// Make an emitter carry a variable from its node's scope.
    pub fn set_emitter_var_name(
        &mut self,
        emitter: EmitterId,
        var_name: impl Into<String>,
    ) -> Result<()> {
        self.emitter_mut(emitter)?.set_var_name(var_name);
        Ok(())
    }

    pub fn set_emitter_name(&mut self, emitter: EmitterId, name: impl Into<String>) -> Result<()> {
        self.emitter_mut(emitter)?.set_name(name);
        Ok(())
    }

    /// Convenience: emitter on `from` wired to a fresh detector on `to`.
    pub fn connect(
        &mut self,
        from: NodeId,
        to: NodeId,
        kind: EmitterKind,
    ) -> Result<(EmitterId, DetectorId)> {
        self.connect_branch(from, Branch::Then, to, kind)
    }

    /// Convenience: emitter on a branch of `from` wired to a fresh detector
    /// on `to`.
    pub fn connect_branch(
        &mut self,
        from: NodeId,
        branch: Branch,
        to: NodeId,
        kind: EmitterKind,
    ) -> Result<(EmitterId, DetectorId)> {
        let detector = self.add_detector(to, DetectorKind::Simple)?;
        let emitter = self.add_emitter_to(from, branch, kind)?;
        self.set_target_detector(emitter, detector)?;
        Ok((emitter, detector))
    }

    /// Designate the node activated by [`start`](Self::start).
    pub fn set_start_node(&mut self, node: NodeId) -> Result<()> {
        self.node(node)?;
        self.start = Some(node);
        Ok(())
    }

    pub fn start_node(&self) -> Option<NodeId> {
        self.start
    }

    /// Declare an instance variable.
    pub fn define_instance_var(&mut self, definition: VariableDefinition) {
        self.vars.define(definition);
    }

    /// Variables shared by every node of the instance.
    pub fn instance_vars(&self) -> &RuntimeVars {
        &self.vars
    }

    pub fn instance_vars_mut(&mut self) -> &mut RuntimeVars {
        &mut self.vars
    }

    /// Set an instance variable by name.
    pub fn set_instance_var(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<()> {
        self.vars.set(name, value)
    }

    /// Raw value of an instance variable.
    pub fn instance_var(&self, name: &str) -> Option<&Value> {
        self.vars.get_raw(name)
    }

    /// Variables scoped to a node.
    pub fn node_vars(&self, node: NodeId) -> Result<&RuntimeVars> {
        Ok(&self.node(node)?.vars)
    }

    pub fn node_vars_mut(&mut self, node: NodeId) -> Result<&mut RuntimeVars> {
        Ok(&mut self.node_mut(node)?.vars)
    }

    pub fn node(&self, node: NodeId) -> Result<&Node> {
        self.nodes
            .get(node.index())
            .ok_or(FlowError::UnknownNode(node))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(node.index())
            .ok_or(FlowError::UnknownNode(node))
    }

    pub fn detector(&self, detector: DetectorId) -> Result<&Detector> {
        self.detectors
            .get(detector.index())
            .ok_or(FlowError::UnknownDetector(detector))
    }

    fn detector_mut(&mut self, detector: DetectorId) -> Result<&mut Detector> {
        self.detectors
            .get_mut(detector.index())
            .ok_or(FlowError::UnknownDetector(detector))
    }

    pub fn emitter(&self, emitter: EmitterId) -> Result<&Emitter> {
        self.emitters
            .get(emitter.index())
            .ok_or(FlowError::UnknownEmitter(emitter))
    }

    fn emitter_mut(&mut self, emitter: EmitterId) -> Result<&mut Emitter> {
        self.emitters
            .get_mut(emitter.index())
            .ok_or(FlowError::UnknownEmitter(emitter))
    }

    fn branch_mut(&mut self, node: NodeId, branch: Branch) -> Result<&mut crate::node::BranchSet> {
        let entry = self.node_mut(node)?;
        let name = entry.name.clone();
        entry.branch_mut(branch).ok_or_else(|| {
            FlowError::construction(format!(
                "node '{name}' has no {} branch",
                branch.as_str()
            ))
        })
    }

    /// Look a node up by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.node_index.get(name).copied()
    }

    pub fn is_active(&self, node: NodeId) -> Result<bool> {
        Ok(self.node(node)?.active)
    }

    pub fn detector_state(&self, detector: DetectorId) -> Result<bool> {
        Ok(self.detector(detector)?.detector_state())
    }

    /// Whether an emitter has fired at least once.
    pub fn emitter_activated(&self, emitter: EmitterId) -> Result<bool> {
        Ok(self.emitter(emitter)?.activated())
    }

    /// Name of the activity behind a handle.
    pub fn activity_name(&self, activity: ActivityId) -> Result<String> {
        self.activities
            .get(activity.index())
            .map(|entry| entry.activity.name())
            .ok_or(FlowError::UnknownActivity(activity))
    }

    /// Node that owns an activity.
    pub fn activity_owner(&self, activity: ActivityId) -> Result<NodeId> {
        self.activities
            .get(activity.index())
            .map(|entry| entry.owner)
            .ok_or(FlowError::UnknownActivity(activity))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Every detector of the workflow, in registration order.
    pub fn detectors(&self) -> impl Iterator<Item = &Detector> {
        self.detectors.iter()
    }

    pub fn emitters(&self) -> impl Iterator<Item = &Emitter> {
        self.emitters.iter()
    }

    /// Nodes currently holding a token.
    pub fn active_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.active)
            .map(Node::id)
            .collect()
    }

    /// Events raised by activities since the last call.
    pub fn take_raised_events(&mut self) -> Vec<RaisedEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Activate the start node.
    pub fn start(&mut self) -> Result<WaveReport> {
        let start = self.start.ok_or_else(|| {
            FlowError::construction(format!("workflow '{}' has no start node", self.name))
        })?;
        info!(workflow = %self.name, "starting workflow");
        self.activate(start)
    }

    /// Activate a node. Activating an active node re-arms it.
    pub fn activate(&mut self, node: NodeId) -> Result<WaveReport> {
        self.node(node)?;
        let mut wave = Wave::new(&self.config);
        self.activate_node(node, &mut wave)?;
        Ok(wave.finish())
    }

    /// Deactivate a node. This is the only way to withdraw its token.
    pub fn deactivate(&mut self, node: NodeId) -> Result<()> {
        self.node(node)?;
        self.deactivate_node(node);
        Ok(())
    }

    /// Attempt a transition of a node.
    ///
    /// Inactive nodes, and nodes whose detectors do not allow a decision,
    /// report [`TransitionOutcome::NotReady`] without side effects.
    pub fn attempt_transition(&mut self, node: NodeId) -> Result<TransitionOutcome> {
        self.node(node)?;
        let mut wave = Wave::new(&self.config);
        match self.transition_node(node, &mut wave)? {
            Some(branch) => Ok(TransitionOutcome::Fired {
                branch,
                report: wave.finish(),
            }),
            None => Ok(TransitionOutcome::NotReady),
        }
    }

    /// Trigger a detector with a payload.
    pub fn trigger(&mut self, detector: DetectorId, payload: Value) -> Result<WaveReport> {
        self.detector(detector)?;
        let mut wave = Wave::new(&self.config);
        self.trigger_detector(detector, payload, &mut wave)?;
        Ok(wave.finish())
    }

    /// Fire an emitter directly.
    pub fn emit(&mut self, emitter: EmitterId) -> Result<WaveReport> {
        self.emitter(emitter)?;
        let mut wave = Wave::new(&self.config);
        self.fire_emitter(emitter, &mut wave)?;
        Ok(wave.finish())
    }

    /// Deliver an application event to every armed event detector that
    /// listens for it.
    pub fn handle_event(&mut self, event_type: &str, event_name: &str) -> Result<WaveReport> {
        let listeners: Vec<DetectorId> = self
            .detectors
            .iter()
            .filter(|detector| detector.listens_for(event_type, event_name))
            .map(Detector::id)
            .collect();

        debug!(event_type, event_name, listeners = listeners.len(), "handling event");

        let mut payload = Map::new();
        payload.insert("event_type".to_string(), Value::from(event_type));
        payload.insert("event_name".to_string(), Value::from(event_name));
        let payload = Value::Object(payload);

        let mut wave = Wave::new(&self.config);
        for detector in listeners {
            // An earlier listener's transition may have disarmed this one.
            if !self.detectors[detector.index()].listens_for(event_type, event_name) {
                trace!(%detector, "listener disarmed during wave, skipping");
                continue;
            }
            self.trigger_detector(detector, payload.clone(), &mut wave)?;
        }
        Ok(wave.finish())
    }

    fn activate_node(&mut self, node: NodeId, wave: &mut Wave) -> Result<()> {
        let entry = &mut self.nodes[node.index()];
        entry.active = true;
        for detector in &entry.detectors {
            self.detectors[detector.index()].on_activate();
        }
        entry.run_activate_hook();
        debug!(node = %entry.name, depth = wave.depth, "node activated");

        self.transition_node(node, wave)?;
        Ok(())
    }

    fn deactivate_node(&mut self, node: NodeId) {
        let entry = &mut self.nodes[node.index()];
        entry.active = false;
        for detector in &entry.detectors {
            self.detectors[detector.index()].on_deactivate();
        }
        entry.run_deactivate_hook();
        debug!(node = %entry.name, "node deactivated");
    }

    fn snapshots(&self, node: NodeId) -> Vec<DetectorSnapshot> {
        self.nodes[node.index()]
            .detectors
            .iter()
            .map(|detector| self.detectors[detector.index()].snapshot())
            .collect()
    }

    /// Evaluate the node once and, if it can transition, deactivate it and
    /// run the chosen branch. Returns the branch taken.
    fn transition_node(&mut self, node: NodeId, wave: &mut Wave) -> Result<Option<Branch>> {
        if !self.nodes[node.index()].active {
            trace!(node = %self.nodes[node.index()].name, "transition skipped, node inactive");
            return Ok(None);
        }

        let snapshots = self.snapshots(node);
        let decision = self.nodes[node.index()].decide(&snapshots);
        let Some(branch) = decision.branch() else {
            trace!(node = %self.nodes[node.index()].name, "transition pending");
            return Ok(None);
        };

        self.deactivate_node(node);

        let entry = &self.nodes[node.index()];
        info!(
            node = %entry.name,
            branch = branch.as_str(),
            depth = wave.depth,
            "node transition"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("petriflow_transitions_total", "branch" => branch.as_str()).increment(1);

        if wave.record_transitions {
            wave.report.transitions.push(TransitionRecord {
                node,
                node_name: entry.name.clone(),
                branch,
                depth: wave.depth,
                timestamp: Utc::now(),
            });
        }

        let (activities, emitters) = match entry.branch(branch) {
            Some(set) => (set.activities.clone(), set.emitters.clone()),
            None => (Vec::new(), Vec::new()),
        };

        self.run_activities(node, &activities, wave);
        for emitter in emitters {
            self.fire_emitter(emitter, wave)?;
        }
        Ok(Some(branch))
    }

    fn run_activities(&mut self, node: NodeId, activities: &[ActivityId], wave: &mut Wave) {
        let Workflow {
            nodes,
            activities: arena,
            vars,
            outbox,
            ..
        } = self;
        let entry = &mut nodes[node.index()];

        for activity in activities {
            let slot = &mut arena[activity.index()];
            let mut context =
                ActivityContext::new(node, &entry.name, &mut entry.vars, vars, outbox);
            if let Err(error) = slot.activity.execute(&mut context) {
                let activity_name = slot.activity.name();
                warn!(
                    node = %entry.name,
                    activity = %activity_name,
                    error = %error,
                    "activity failed"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!("petriflow_activity_failures_total").increment(1);
                wave.report.failures.push(ActivityFailure {
                    node,
                    node_name: entry.name.clone(),
                    activity: *activity,
                    activity_name,
                    message: format!("{error:#}"),
                });
            }
        }
    }

    fn notify_detector_satisfaction(
        &mut self,
        node: NodeId,
        detector: DetectorId,
        wave: &mut Wave,
    ) -> Result<()> {
        if !self.nodes[node.index()].active {
            trace!(
                node = %self.nodes[node.index()].name,
                %detector,
                "satisfaction recorded on inactive node"
            );
            return Ok(());
        }
        self.transition_node(node, wave)?;
        Ok(())
    }

    fn trigger_detector(
        &mut self,
        detector: DetectorId,
        payload: Value,
        wave: &mut Wave,
    ) -> Result<()> {
        let entry = &mut self.detectors[detector.index()];
        if !entry.record_trigger(payload) {
            trace!(%detector, "detector already satisfied");
            return Ok(());
        }
        let owner = entry.owner();
        debug!(%detector, node = %self.nodes[owner.index()].name, "detector satisfied");
        self.notify_detector_satisfaction(owner, detector, wave)
    }

    fn fire_emitter(&mut self, emitter: EmitterId, wave: &mut Wave) -> Result<()> {
        let entry = &self.emitters[emitter.index()];
        let owner = entry.owner();
        let kind = entry.kind();
        let target = entry.target_detector();

        let mut payload = Value::Null;
        if let Some(var_name) = entry.var_name() {
            if let Some(value) = self.nodes[owner.index()].vars.get_raw(var_name) {
                self.vars.set_raw(var_name.to_string(), value.clone());
                let mut carried = Map::new();
                carried.insert(var_name.to_string(), value.clone());
                payload = Value::Object(carried);
            }
        }

        if let Some(target) = target {
            let target_node = self.detectors[target.index()].owner();
            wave.descend(&self.nodes[target_node.index()].name)?;
            trace!(%emitter, %target, "emitting");
            let mut deliver = true;
            if kind == EmitterKind::Activation {
                self.activate_node(target_node, wave)?;
                // Inactive here means the target already used its token.
                deliver = self.nodes[target_node.index()].active;
            }
            if deliver {
                self.trigger_detector(target, payload, wave)?;
            } else {
                trace!(%emitter, %target, "target transitioned on activation, trigger dropped");
            }
            wave.ascend();
        }

        self.emitters[emitter.index()].mark_emitted();
        Ok(())
    }
}

/// Builder for [`Workflow`].
pub struct WorkflowBuilder {
    name: String,
    config: EngineConfig,
    vars: RuntimeVars,
}

impl WorkflowBuilder {
    /// Create a new workflow builder.
    pub fn new() -> Self {
        Self {
            name: "workflow".to_string(),
            config: EngineConfig::default(),
            vars: RuntimeVars::new(),
        }
    }

    /// Set the workflow name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum propagation depth.
    pub fn max_propagation_depth(mut self, depth: usize) -> Self {
        self.config.max_propagation_depth = depth;
        self
    }

    /// Seed an instance variable.
    pub fn var(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.vars.set(name, value)?;
        Ok(self)
    }

    /// Declare an instance variable.
    pub fn define_var(mut self, definition: VariableDefinition) -> Self {
        self.vars.define(definition);
        self
    }

    /// Build the workflow.
    pub fn build(self) -> Result<Workflow> {
        self.config.validate()?;
        Ok(Workflow::with_parts(self.name, self.config, self.vars))
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
