//! Approval process with a conditional node racing a reviewer decision
//! against a timeout.

use petriflow_core::prelude::*;
use serde_json::json;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("🚀 Starting petriflow approval example");

    let mut workflow = Workflow::builder()
        .name("ApprovalProcess")
        .define_var(VariableDefinition::new("DataObject_1", "grade").with_type("integer"))
        .build()?;

    let submit = workflow.add_node("submit")?;
    let review = workflow.add_conditional_node("review", helpers::first_of(0, 1))?;
    let approved = workflow.add_node("approved")?;
    let timed_out = workflow.add_node("timed_out")?;

    // review waits on two detectors: reviewer done (0) and timeout (1).
    let reviewer_done = workflow.add_detector(review, DetectorKind::event("Review", "Done"))?;
    workflow.set_detector_name(reviewer_done, "reviewer_done")?;
    let timeout = workflow.add_detector(review, DetectorKind::event("Timer", "Expired"))?;
    workflow.set_detector_name(timeout, "timeout")?;

    workflow.add_activity(
        submit,
        ScriptActivity::new("submit", |ctx: &mut ActivityContext<'_>| {
            println!("📨 Submitted from node '{}'", ctx.node_name());
            Ok(())
        }),
    )?;
    let (to_review, _) = workflow.connect(submit, review, EmitterKind::Activation)?;
    workflow.set_emitter_name(to_review, "submit_to_review")?;

    workflow.add_activity(review, AssignVariableActivity::new("grade", json!(92)))?;
    let (carry_grade, _) =
        workflow.connect_branch(review, Branch::Then, approved, EmitterKind::Activation)?;
    workflow.set_emitter_var_name(carry_grade, "grade")?;
    workflow.connect_branch(review, Branch::Else, timed_out, EmitterKind::Activation)?;

    workflow.add_activity(approved, EventRaisingActivity::new("Course", "Passed"))?;
    workflow.add_activity(timed_out, LoggingActivity::new("review timed out"))?;

    workflow.set_start_node(submit)?;

    println!("\n🏃 Starting workflow...");
    let report = workflow.start()?;
    println!("Fired: {:?}", report.fired_nodes());
    println!("Waiting on review: {}", workflow.is_active(review)?);

    println!("\n📬 Reviewer finishes first");
    let report = workflow.handle_event("Review", "Done")?;
    println!("Fired: {:?}", report.fired_nodes());

    // Arrives too late: review no longer listens.
    let report = workflow.handle_event("Timer", "Expired")?;
    println!("Late timeout fired: {:?}", report.fired_nodes());

    println!("\n📊 Results:");
    println!("Grade: {:?}", workflow.instance_vars().get_json::<i64>("grade")?);
    for event in workflow.take_raised_events() {
        println!(
            "Raised {}/{} from {} at {}",
            event.event_type, event.event_name, event.source, event.raised_at
        );
    }

    println!("\n✅ Approval example completed successfully!");

    Ok(())
}
