//! Start event wired to an end event that throws a signal.

use petriflow_core::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut workflow = Workflow::new("EndEvent_Signal_Simple");

    let start = workflow.add_node("StartEvent_1")?;
    workflow.set_start_node(start)?;

    let end = workflow.add_node("EndEvent_1")?;
    workflow.add_activity(end, EventRaisingActivity::new("Course", "UserLeft"))?;

    let detector = workflow.add_detector(end, DetectorKind::Simple)?;
    let emitter = workflow.add_emitter(start, EmitterKind::Activation)?;
    workflow.set_target_detector(emitter, detector)?;

    let report = workflow.start()?;

    for record in &report.transitions {
        println!(
            "{} -> {} (depth {})",
            record.node_name,
            record.branch.as_str(),
            record.depth
        );
    }
    for event in workflow.take_raised_events() {
        println!("signal: {}/{}", event.event_type, event.event_name);
    }

    Ok(())
}
