//! Test: cancelling a running pipeline

use crate::helpers::*;
use dagflow::core::config::RunOptions;
use dagflow::core::state::{FailureKind, PipelineState, StepOutcome, StepState};
use dagflow::core::step::StepDefinition;
use dagflow::execution::ExecutionEngine;
use std::time::{Duration, Instant};

fn options(grace: Duration) -> RunOptions {
    RunOptions::default().with_cancel_grace(grace)
}

#[tokio::test]
async fn test_stubborn_step_is_cancelled_after_grace() {
    let executor = ScriptedExecutor::new().stubborn("slow", Duration::from_secs(10));
    let engine = ExecutionEngine::new(executor, options(Duration::from_millis(100)));
    let run = engine
        .start(pipeline(vec![
            StepDefinition::new("slow"),
            StepDefinition::new("after").depends_on(["slow"]),
        ]))
        .unwrap();

    let tracker = run.tracker().clone();
    assert!(
        eventually(Duration::from_secs(1), || matches!(
            tracker.step_status("slow"),
            Ok(StepState::Running { .. })
        ))
        .await
    );

    let cancelled_at = Instant::now();
    run.cancel();
    let report = run.wait().await;
    let elapsed = cancelled_at.elapsed();

    assert_pipeline_failed(&report);
    assert_step_failed(&report, "slow", FailureKind::Cancelled);
    assert_step_skipped(&report, "after", "pipeline cancelled");
    assert!(elapsed >= Duration::from_millis(90), "grace cut short: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "grace ignored: {:?}", elapsed);

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].outcome, StepOutcome::Cancelled);
    assert_eq!(tracker.running_count(), 0);
}

#[tokio::test]
async fn test_cooperative_step_stops_within_grace() {
    let executor = ScriptedExecutor::new().slow("a", Duration::from_secs(10));
    let engine = ExecutionEngine::new(executor, options(Duration::from_secs(5)));
    let run = engine
        .start(pipeline(vec![StepDefinition::new("a"), StepDefinition::new("b").depends_on(["a"])]))
        .unwrap();

    let tracker = run.tracker().clone();
    assert!(eventually(Duration::from_secs(1), || tracker.running_count() == 1).await);

    let started = Instant::now();
    run.cancellation_token().cancel();
    let report = run.wait().await;

    // The executor reacted to the token, so there was no need to wait out the grace
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_pipeline_failed(&report);
    assert_step_failed(&report, "a", FailureKind::Cancelled);
    assert_step_skipped(&report, "b", "pipeline cancelled");
}

#[tokio::test]
async fn test_step_finishing_during_grace_keeps_its_outcome() {
    let executor = ScriptedExecutor::new().stubborn("a", Duration::from_millis(50));
    let engine = ExecutionEngine::new(executor, options(Duration::from_secs(2)));
    let run = engine
        .start(pipeline(vec![StepDefinition::new("a"), StepDefinition::new("b").depends_on(["a"])]))
        .unwrap();

    let tracker = run.tracker().clone();
    assert!(eventually(Duration::from_secs(1), || tracker.running_count() == 1).await);
    run.cancel();
    let report = run.wait().await;

    assert_pipeline_failed(&report);
    assert_step_succeeded(&report, "a");
    assert_step_skipped(&report, "b", "pipeline cancelled");
}

#[tokio::test]
async fn test_cancel_right_after_start() {
    let executor = ScriptedExecutor::new().with_default_delay(Duration::from_secs(10));
    let engine = ExecutionEngine::new(executor, options(Duration::from_millis(50)));
    let run = engine
        .start(pipeline(vec![
            StepDefinition::new("a"),
            StepDefinition::new("b"),
            StepDefinition::new("c").depends_on(["a", "b"]),
        ]))
        .unwrap();
    run.cancel();
    let report = run.wait().await;

    assert_eq!(report.status, PipelineState::Failed);
    assert!(report.steps.values().all(|s| s.is_terminal()));
    assert!(!report.steps.values().any(|s| *s == StepState::Succeeded));
    assert_step_skipped(&report, "c", "pipeline cancelled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_grace_period_bounds_a_blocking_step() {
    let engine = ExecutionEngine::new(
        BlockingExecutor {
            block: Duration::from_millis(800),
        },
        options(Duration::from_millis(50)),
    );
    let run = engine.start(pipeline(vec![StepDefinition::new("blocked")])).unwrap();

    let tracker = run.tracker().clone();
    assert!(eventually(Duration::from_secs(1), || tracker.running_count() == 1).await);

    let cancelled_at = Instant::now();
    run.cancel();
    let report = run.wait().await;
    let elapsed = cancelled_at.elapsed();

    assert!(elapsed < Duration::from_millis(400), "wait took {:?}", elapsed);
    assert_pipeline_failed(&report);
    assert_step_failed(&report, "blocked", FailureKind::Cancelled);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].outcome, StepOutcome::Cancelled);
}
