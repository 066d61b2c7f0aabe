//! CLI output formatting

use crate::{
    core::state::{ExecutionRecord, PipelineState, StepOutcome, StepState},
    execution::{ExecutionEvent, PipelineReport},
};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Ready => style("READY").blue().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Succeeded => style("SUCCEEDED").green().to_string(),
        StepState::Failed(kind) => style(format!("FAILED ({})", kind)).red().to_string(),
        StepState::Skipped { reason } => style(format!("SKIPPED ({})", reason)).dim().to_string(),
    }
}

/// Format a pipeline state for display
pub fn format_status(status: PipelineState) -> String {
    match status {
        PipelineState::Idle => style("IDLE").dim().to_string(),
        PipelineState::Running => style("RUNNING").yellow().to_string(),
        PipelineState::Succeeded => style("SUCCEEDED").green().to_string(),
        PipelineState::Failed => style("FAILED").red().to_string(),
    }
}

fn format_elapsed(record: &ExecutionRecord) -> String {
    let millis = record.duration().num_milliseconds().max(0);
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.1}s", millis as f64 / 1000.0)
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting pipeline {} with {} step(s) ({})",
            ROCKET,
            style(pipeline_name).bold(),
            total_steps,
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepStarted { step_id } => {
            format!("{} {}", SPINNER, style(step_id).cyan())
        }
        ExecutionEvent::StepFinished { record } => match &record.outcome {
            StepOutcome::Succeeded => format!(
                "{} {} {}",
                CHECK,
                style(&record.step_id).green(),
                style(format_elapsed(record)).dim()
            ),
            outcome => format!(
                "{} {}: {} {}",
                CROSS,
                style(&record.step_id).red(),
                style(outcome.error_detail().unwrap_or_default()).dim(),
                style(format_elapsed(record)).dim()
            ),
        },
        ExecutionEvent::StepSkipped { step_id, reason } => {
            format!("{} {} ({})", SKIP, style(step_id).dim(), style(reason).dim())
        }
        ExecutionEvent::PipelineFinished {
            execution_id,
            status,
        } => {
            let status_str = match status {
                PipelineState::Succeeded => format!("completed {}", style("successfully").green()),
                PipelineState::Failed => style("failed").red().to_string(),
                other => other.to_string(),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// Format the per-step summary of a finished run
pub fn format_report(report: &PipelineReport) -> String {
    let width = report.steps.keys().map(String::len).max().unwrap_or(0);
    let mut lines = vec![format!(
        "{} {} {}",
        INFO,
        style(&report.pipeline_name).bold(),
        format_status(report.status)
    )];
    for (step_id, state) in &report.steps {
        lines.push(format!(
            "  {:width$}  {}",
            step_id,
            format_step_state(state),
            width = width
        ));
    }
    lines.join("\n")
}
