use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
#[cfg(feature = "tracing")]
use tracing_test::traced_test;

use crate::prelude::*;

type Trace = Arc<Mutex<Vec<String>>>;

fn new_trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().clone()
}

fn record(trace: &Trace, label: &str) -> impl Activity + 'static {
    let trace = Arc::clone(trace);
    let label = label.to_string();
    ScriptActivity::new(format!("record:{label}"), move |_ctx: &mut ActivityContext<'_>| {
        trace.lock().unwrap().push(label.clone());
        Ok(())
    })
}

fn failing(message: &'static str) -> impl Activity + 'static {
    ScriptActivity::new("failing", move |_ctx: &mut ActivityContext<'_>| {
        Err(eyre::eyre!(message))
    })
}

/// S --activation--> E, E records "fired".
fn start_to_end(trace: &Trace) -> (Workflow, NodeId, NodeId, EmitterId) {
    let mut workflow = Workflow::new("scenario_a");
    let start = workflow.add_node("S").unwrap();
    let end = workflow.add_node("E").unwrap();
    workflow.add_activity(end, record(trace, "fired")).unwrap();
    let (emitter, _) = workflow
        .connect(start, end, EmitterKind::Activation)
        .unwrap();
    workflow.set_start_node(start).unwrap();
    (workflow, start, end, emitter)
}

/// Conditional node C with detectors D0, D1 deciding by which one fired.
struct Race {
    workflow: Workflow,
    gate: NodeId,
    d0: DetectorId,
    d1: DetectorId,
}

fn race(trace: &Trace) -> Race {
    let mut workflow = Workflow::new("race");
    let gate = workflow
        .add_conditional_node("C", helpers::first_of(0, 1))
        .unwrap();
    let d0 = workflow.add_detector(gate, DetectorKind::Simple).unwrap();
    let d1 = workflow.add_detector(gate, DetectorKind::Simple).unwrap();
    workflow.add_activity(gate, record(trace, "then")).unwrap();
    workflow
        .add_activity_to(gate, Branch::Else, record(trace, "else"))
        .unwrap();
    Race {
        workflow,
        gate,
        d0,
        d1,
    }
}

#[test]
fn scenario_a_start_propagates_to_end() {
    let trace = new_trace();
    let (mut workflow, start, end, emitter) = start_to_end(&trace);

    let report = workflow.start().unwrap();

    assert_eq!(entries(&trace), vec!["fired".to_string()]);
    assert!(!workflow.is_active(start).unwrap());
    assert!(!workflow.is_active(end).unwrap());
    assert!(workflow.emitter_activated(emitter).unwrap());
    assert_eq!(report.fired_nodes(), vec!["S", "E"]);
    assert_eq!(report.depth_reached, 1);
    assert!(report.is_clean());
    assert!(workflow.active_nodes().is_empty());
}

#[test]
fn scenario_b_then_branch_on_first_detector() {
    let trace = new_trace();
    let Race {
        mut workflow,
        gate,
        d0,
        ..
    } = race(&trace);

    workflow.activate(gate).unwrap();
    let report = workflow.trigger(d0, Value::Null).unwrap();

    assert_eq!(entries(&trace), vec!["then".to_string()]);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].branch, Branch::Then);
    assert!(!workflow.is_active(gate).unwrap());
}

#[test]
fn scenario_b_else_branch_on_second_detector() {
    let trace = new_trace();
    let Race {
        mut workflow,
        gate,
        d1,
        ..
    } = race(&trace);

    workflow.activate(gate).unwrap();
    workflow.trigger(d1, Value::Null).unwrap();

    assert_eq!(entries(&trace), vec!["else".to_string()]);
}

#[test]
fn scenario_c_pending_keeps_node_active() {
    let trace = new_trace();
    let Race {
        mut workflow, gate, ..
    } = race(&trace);

    let report = workflow.activate(gate).unwrap();
    assert!(report.transitions.is_empty());

    let outcome = workflow.attempt_transition(gate).unwrap();

    assert_eq!(outcome, TransitionOutcome::NotReady);
    assert!(workflow.is_active(gate).unwrap());
    assert!(entries(&trace).is_empty());
}

#[test]
fn both_detectors_before_decision_stays_pending() {
    let trace = new_trace();
    let Race {
        mut workflow,
        gate,
        d0,
        d1,
    } = race(&trace);

    // Satisfied while inactive, so no transition is attempted yet.
    workflow.trigger(d0, Value::Null).unwrap();
    workflow.trigger(d1, Value::Null).unwrap();
    workflow.activate(gate).unwrap();

    assert!(workflow.is_active(gate).unwrap());
    assert!(entries(&trace).is_empty());
}

#[test]
fn inactive_node_attempt_has_no_side_effects() {
    let trace = new_trace();
    let mut workflow = Workflow::new("inactive");
    let node = workflow.add_node("task").unwrap();
    let target = workflow.add_node("next").unwrap();
    workflow.add_activity(node, record(&trace, "task")).unwrap();
    let (emitter, detector) = workflow.connect(node, target, EmitterKind::Simple).unwrap();

    let outcome = workflow.attempt_transition(node).unwrap();

    assert!(!outcome.is_fired());
    assert!(entries(&trace).is_empty());
    assert!(!workflow.emitter_activated(emitter).unwrap());
    assert!(!workflow.detector_state(detector).unwrap());
    assert!(!workflow.is_active(node).unwrap());
}

#[test]
fn node_without_detectors_fires_once_on_activation() {
    let trace = new_trace();
    let mut workflow = Workflow::new("vacuous");
    let node = workflow.add_node("task").unwrap();
    let next = workflow.add_node("next").unwrap();
    workflow.add_activity(node, record(&trace, "a")).unwrap();
    workflow.add_activity(node, record(&trace, "b")).unwrap();
    let (emitter, detector) = workflow.connect(node, next, EmitterKind::Simple).unwrap();

    let report = workflow.activate(node).unwrap();

    assert_eq!(entries(&trace), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(report.fired_nodes(), vec!["task"]);
    assert!(workflow.emitter_activated(emitter).unwrap());
    // Simple emitters record satisfaction without activating the target.
    assert!(workflow.detector_state(detector).unwrap());
    assert!(!workflow.is_active(next).unwrap());

    // A second attempt on the now inactive node does nothing.
    assert_eq!(
        workflow.attempt_transition(node).unwrap(),
        TransitionOutcome::NotReady
    );
    assert_eq!(entries(&trace).len(), 2);
}

#[test]
fn retrigger_notifies_at_most_once() {
    let trace = new_trace();
    let mut workflow = Workflow::new("retrigger");
    let node = workflow.add_node("join").unwrap();
    let d0 = workflow.add_detector(node, DetectorKind::Simple).unwrap();
    let d1 = workflow.add_detector(node, DetectorKind::Simple).unwrap();
    workflow.add_activity(node, record(&trace, "joined")).unwrap();

    workflow.activate(node).unwrap();
    workflow.trigger(d0, json!({ "n": 1 })).unwrap();
    workflow.trigger(d0, json!({ "n": 2 })).unwrap();
    assert!(entries(&trace).is_empty());

    workflow.trigger(d1, Value::Null).unwrap();
    assert_eq!(entries(&trace), vec!["joined".to_string()]);

    // Token consumed: the node is inactive and re-triggering does not fire it.
    workflow.trigger(d1, Value::Null).unwrap();
    assert_eq!(entries(&trace).len(), 1);
}

#[test]
fn reactivation_allows_a_second_cycle() {
    let trace = new_trace();
    let mut workflow = Workflow::new("cycle");
    let node = workflow.add_node("task").unwrap();
    let detector = workflow.add_detector(node, DetectorKind::Simple).unwrap();
    workflow.add_activity(node, record(&trace, "run")).unwrap();

    workflow.activate(node).unwrap();
    workflow.trigger(detector, Value::Null).unwrap();
    workflow.activate(node).unwrap();
    assert!(workflow.is_active(node).unwrap());
    workflow.trigger(detector, Value::Null).unwrap();

    assert_eq!(entries(&trace), vec!["run".to_string(), "run".to_string()]);
}

#[test]
fn reactivating_an_active_node_is_idempotent() {
    let trace = new_trace();
    let mut workflow = Workflow::new("rearm");
    let node = workflow.add_node("wait").unwrap();
    let detector = workflow.add_detector(node, DetectorKind::Simple).unwrap();
    workflow.add_activity(node, record(&trace, "done")).unwrap();

    workflow.activate(node).unwrap();
    workflow.activate(node).unwrap();
    assert!(workflow.is_active(node).unwrap());
    assert!(entries(&trace).is_empty());

    workflow.trigger(detector, Value::Null).unwrap();
    assert_eq!(entries(&trace), vec!["done".to_string()]);
}

#[test]
fn constant_then_never_runs_else() {
    for _ in 0..32 {
        let trace = new_trace();
        let mut workflow = Workflow::new("constant");
        let gate = workflow
            .add_conditional_node("gate", helpers::always(Decision::Then))
            .unwrap();
        let detectors: Vec<DetectorId> = (0..3)
            .map(|_| workflow.add_detector(gate, DetectorKind::Simple).unwrap())
            .collect();
        workflow.add_activity(gate, record(&trace, "then")).unwrap();
        workflow
            .add_activity_to(gate, Branch::Else, record(&trace, "else"))
            .unwrap();

        for detector in &detectors {
            if fastrand::bool() {
                workflow.trigger(*detector, Value::Null).unwrap();
            }
        }
        workflow.activate(gate).unwrap();

        assert_eq!(entries(&trace), vec!["then".to_string()]);
    }
}

#[test]
fn activation_order_does_not_change_outcome() {
    // Activate and the three triggers in every random order: the node must
    // transition exactly once.
    for _ in 0..64 {
        let trace = new_trace();
        let mut workflow = Workflow::new("ordering");
        let node = workflow.add_node("join").unwrap();
        let detectors: Vec<DetectorId> = (0..3)
            .map(|_| workflow.add_detector(node, DetectorKind::Simple).unwrap())
            .collect();
        workflow.add_activity(node, record(&trace, "joined")).unwrap();

        let mut steps: Vec<Option<DetectorId>> = detectors.iter().copied().map(Some).collect();
        steps.push(None);
        fastrand::shuffle(&mut steps);

        for step in steps {
            match step {
                Some(detector) => workflow.trigger(detector, Value::Null).unwrap(),
                None => workflow.activate(node).unwrap(),
            };
        }

        assert_eq!(entries(&trace), vec!["joined".to_string()]);
        assert!(!workflow.is_active(node).unwrap());
    }
}

#[test]
fn emitter_carries_variable_downstream() {
    let mut workflow = Workflow::new("data");
    let source = workflow.add_node("grade").unwrap();
    let sink = workflow.add_node("notify").unwrap();
    let seen = Arc::new(Mutex::new(None::<i64>));
    let seen_in_activity = Arc::clone(&seen);
    workflow
        .add_activity(
            sink,
            ScriptActivity::new("read_score", move |ctx: &mut ActivityContext<'_>| {
                *seen_in_activity.lock().unwrap() = ctx.instance_vars().get_json("score")?;
                Ok(())
            }),
        )
        .unwrap();
    let (emitter, detector) = workflow
        .connect(source, sink, EmitterKind::Activation)
        .unwrap();
    workflow.set_emitter_var_name(emitter, "score").unwrap();
    workflow.node_vars_mut(source).unwrap().set("score", 42).unwrap();
    workflow.set_start_node(source).unwrap();

    workflow.start().unwrap();

    assert_eq!(workflow.instance_var("score"), Some(&json!(42)));
    assert_eq!(*seen.lock().unwrap(), Some(42));
    assert_eq!(
        workflow.detector(detector).unwrap().last_payload(),
        Some(&json!({ "score": 42 }))
    );
}

#[test]
fn emitter_without_variable_leaves_store_untouched() {
    let mut workflow = Workflow::new("no_data");
    let source = workflow.add_node("a").unwrap();
    let sink = workflow.add_node("b").unwrap();
    let (emitter, _) = workflow.connect(source, sink, EmitterKind::Simple).unwrap();
    workflow.set_emitter_var_name(emitter, "score").unwrap();

    workflow.emit(emitter).unwrap();

    assert!(workflow.instance_var("score").is_none());
    assert!(workflow.emitter_activated(emitter).unwrap());
}

#[test]
fn activity_written_variable_flows_through_data_emitter() {
    let mut workflow = Workflow::new("assign");
    let source = workflow.add_node("decide").unwrap();
    let sink = workflow.add_node("archive").unwrap();
    workflow
        .add_activity(source, AssignVariableActivity::new("verdict", json!("passed")))
        .unwrap();
    let (emitter, _) = workflow
        .connect(source, sink, EmitterKind::Activation)
        .unwrap();
    workflow.set_emitter_var_name(emitter, "verdict").unwrap();
    workflow.set_start_node(source).unwrap();

    workflow.start().unwrap();

    assert_eq!(workflow.instance_var("verdict"), Some(&json!("passed")));
}

#[test]
#[cfg(feature = "tracing")]
#[traced_test]
fn activity_failure_is_isolated() {
    let trace = new_trace();
    let mut workflow = Workflow::new("isolation");
    let node = workflow.add_node("task").unwrap();
    let next = workflow.add_node("next").unwrap();
    workflow.add_activity(node, record(&trace, "first")).unwrap();
    let broken = workflow.add_activity(node, failing("smtp down")).unwrap();
    workflow.add_activity(node, record(&trace, "third")).unwrap();
    workflow.add_activity(next, record(&trace, "next")).unwrap();
    workflow.connect(node, next, EmitterKind::Activation).unwrap();

    let report = workflow.activate(node).unwrap();

    assert_eq!(
        entries(&trace),
        vec!["first".to_string(), "third".to_string(), "next".to_string()]
    );
    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.activity, broken);
    assert_eq!(failure.node_name, "task");
    assert_eq!(failure.message, "smtp down");
    assert!(logs_contain("activity failed"));
}

#[test]
fn failing_predicate_does_not_route() {
    let trace = new_trace();
    let mut workflow = Workflow::new("predicate_error");
    let gate = workflow
        .add_conditional_node(
            "gate",
            helpers::predicate("broken", |_: &[DetectorSnapshot]| {
                Err(eyre::eyre!("division by zero"))
            }),
        )
        .unwrap();
    workflow.add_activity(gate, record(&trace, "then")).unwrap();
    workflow
        .add_activity_to(gate, Branch::Else, record(&trace, "else"))
        .unwrap();

    workflow.activate(gate).unwrap();

    assert!(workflow.is_active(gate).unwrap());
    assert!(entries(&trace).is_empty());

    workflow
        .set_evaluation(gate, helpers::always(Decision::Else))
        .unwrap();
    let outcome = workflow.attempt_transition(gate).unwrap();
    assert_eq!(outcome.branch(), Some(Branch::Else));
    assert_eq!(entries(&trace), vec!["else".to_string()]);
}

#[test]
fn predicate_is_evaluated_once_per_attempt() {
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    let mut workflow = Workflow::new("single_pass");
    let gate = workflow
        .add_conditional_node(
            "gate",
            helpers::predicate("counting", move |_: &[DetectorSnapshot]| {
                *counter.lock().unwrap() += 1;
                Ok(Decision::Then)
            }),
        )
        .unwrap();

    workflow.activate(gate).unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn else_emitters_route_to_else_target() {
    let trace = new_trace();
    let mut workflow = Workflow::new("routing");
    let gate = workflow
        .add_conditional_node("gate", helpers::always(Decision::Else))
        .unwrap();
    let approve = workflow.add_node("approve").unwrap();
    let reject = workflow.add_node("reject").unwrap();
    workflow.add_activity(approve, record(&trace, "approve")).unwrap();
    workflow.add_activity(reject, record(&trace, "reject")).unwrap();
    let (then_emitter, _) = workflow
        .connect_branch(gate, Branch::Then, approve, EmitterKind::Activation)
        .unwrap();
    let (else_emitter, _) = workflow
        .connect_branch(gate, Branch::Else, reject, EmitterKind::Activation)
        .unwrap();
    workflow.set_start_node(gate).unwrap();

    let report = workflow.start().unwrap();

    assert_eq!(entries(&trace), vec!["reject".to_string()]);
    assert_eq!(report.fired_nodes(), vec!["gate", "reject"]);
    assert!(!workflow.emitter_activated(then_emitter).unwrap());
    assert!(workflow.emitter_activated(else_emitter).unwrap());
}

#[test]
fn self_loop_reports_overflow() {
    let mut workflow = Workflow::builder()
        .name("loop")
        .max_propagation_depth(16)
        .build()
        .unwrap();
    let node = workflow.add_node("spin").unwrap();
    let (_, detector) = workflow.connect(node, node, EmitterKind::Activation).unwrap();

    workflow.activate(node).unwrap();
    let err = workflow.trigger(detector, Value::Null).unwrap_err();

    match err {
        FlowError::PropagationOverflow { depth, node } => {
            assert_eq!(depth, 17);
            assert_eq!(node, "spin");
        }
        other => panic!("expected overflow, got {other}"),
    }
}

#[test]
fn long_chain_within_limit_completes() {
    let trace = new_trace();
    let mut workflow = Workflow::builder()
        .max_propagation_depth(10)
        .build()
        .unwrap();
    let nodes: Vec<NodeId> = (0..11)
        .map(|index| workflow.add_node(format!("n{index}")).unwrap())
        .collect();
    for pair in nodes.windows(2) {
        workflow
            .connect(pair[0], pair[1], EmitterKind::Activation)
            .unwrap();
    }
    workflow.add_activity(nodes[10], record(&trace, "last")).unwrap();
    workflow.set_start_node(nodes[0]).unwrap();

    let report = workflow.start().unwrap();

    assert_eq!(report.transitions.len(), 11);
    assert_eq!(report.depth_reached, 10);
    assert_eq!(entries(&trace), vec!["last".to_string()]);
}

#[test]
fn signal_end_event_round_trip() {
    // End event raises a signal; a second workflow waits for it.
    let mut sender = Workflow::new("EndEvent_Signal_Simple");
    let start = sender.add_node("StartEvent_1").unwrap();
    let end = sender.add_node("EndEvent_1").unwrap();
    sender
        .add_activity(end, EventRaisingActivity::new("Course", "UserLeft"))
        .unwrap();
    sender.connect(start, end, EmitterKind::Activation).unwrap();
    sender.set_start_node(start).unwrap();

    let trace = new_trace();
    let mut receiver = Workflow::new("listener");
    let wait = receiver.add_node("wait_for_leave").unwrap();
    let detector = receiver
        .add_detector(wait, DetectorKind::event("Course", "UserLeft"))
        .unwrap();
    receiver.add_activity(wait, record(&trace, "left")).unwrap();

    // Not listening yet: the event is ignored.
    receiver.handle_event("Course", "UserLeft").unwrap();
    assert!(!receiver.detector_state(detector).unwrap());

    receiver.activate(wait).unwrap();
    sender.start().unwrap();
    let events = sender.take_raised_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, "EndEvent_1");

    for event in &events {
        receiver
            .handle_event(&event.event_type, &event.event_name)
            .unwrap();
    }

    assert_eq!(entries(&trace), vec!["left".to_string()]);
    assert_eq!(
        receiver.detector(detector).unwrap().last_payload(),
        Some(&json!({ "event_type": "Course", "event_name": "UserLeft" }))
    );
    assert!(sender.take_raised_events().is_empty());
}

#[test]
fn node_hooks_follow_lifecycle() {
    #[derive(Debug)]
    struct CountingHook;

    impl NodeHook for CountingHook {
        fn on_activate(&mut self, _node: &str, vars: &mut RuntimeVars) {
            let count: i64 = vars.get_json("activations").ok().flatten().unwrap_or(0);
            vars.set_raw("activations", json!(count + 1));
        }

        fn on_deactivate(&mut self, _node: &str, vars: &mut RuntimeVars) {
            vars.set_raw("deactivated", json!(true));
        }
    }

    let mut workflow = Workflow::new("hooks");
    let node = workflow.add_node("task").unwrap();
    workflow.add_detector(node, DetectorKind::Simple).unwrap();
    workflow.set_node_hook(node, CountingHook).unwrap();

    workflow.activate(node).unwrap();
    workflow.activate(node).unwrap();
    assert_eq!(
        workflow.node_vars(node).unwrap().get_raw("activations"),
        Some(&json!(2))
    );
    assert!(!workflow.node_vars(node).unwrap().contains("deactivated"));

    workflow.deactivate(node).unwrap();
    assert!(!workflow.is_active(node).unwrap());
    assert_eq!(
        workflow.node_vars(node).unwrap().get_raw("deactivated"),
        Some(&json!(true))
    );
}

#[test]
fn disabled_transition_recording_keeps_report_empty() {
    let trace = new_trace();
    let mut workflow = Workflow::builder()
        .config(EngineConfig::new().with_record_transitions(false))
        .build()
        .unwrap();
    let node = workflow.add_node("task").unwrap();
    workflow.add_activity(node, record(&trace, "ran")).unwrap();

    let report = workflow.activate(node).unwrap();

    assert!(report.transitions.is_empty());
    assert_eq!(entries(&trace), vec!["ran".to_string()]);
}

#[test]
fn shared_event_fires_a_node_once() {
    let trace = new_trace();
    let mut workflow = Workflow::new("shared_event");
    let gate = workflow
        .add_conditional_node(
            "gate",
            helpers::predicate("any", |detectors: &[DetectorSnapshot]| {
                Ok(detectors.iter().any(DetectorSnapshot::detector_state).then_some(true).into())
            }),
        )
        .unwrap();
    let d0 = workflow
        .add_detector(gate, DetectorKind::event("Course", "UserLeft"))
        .unwrap();
    let d1 = workflow
        .add_detector(gate, DetectorKind::event("Course", "UserLeft"))
        .unwrap();
    workflow.add_activity(gate, record(&trace, "then")).unwrap();

    workflow.activate(gate).unwrap();
    let report = workflow.handle_event("Course", "UserLeft").unwrap();

    assert_eq!(report.fired_nodes(), vec!["gate"]);
    assert!(!workflow.is_active(gate).unwrap());
    assert!(!workflow.detector_state(d0).unwrap());
    assert!(!workflow.detector_state(d1).unwrap());

    workflow.activate(gate).unwrap();
    assert_eq!(entries(&trace), vec!["then".to_string()]);
    assert!(workflow.is_active(gate).unwrap());
}

#[test]
fn activation_emitter_leaves_no_token_on_eager_target() {
    let trace = new_trace();
    let mut workflow = Workflow::new("eager");
    let source = workflow.add_node("S").unwrap();
    let gate = workflow
        .add_conditional_node("G", helpers::always(Decision::Then))
        .unwrap();
    workflow.add_activity(gate, record(&trace, "gate")).unwrap();
    let (emitter, detector) = workflow
        .connect(source, gate, EmitterKind::Activation)
        .unwrap();
    workflow.set_start_node(source).unwrap();

    let report = workflow.start().unwrap();

    assert_eq!(report.fired_nodes(), vec!["S", "G"]);
    assert!(!workflow.is_active(gate).unwrap());
    assert!(!workflow.detector_state(detector).unwrap());
    assert!(workflow.emitter_activated(emitter).unwrap());
    assert_eq!(entries(&trace), vec!["gate".to_string()]);
}
