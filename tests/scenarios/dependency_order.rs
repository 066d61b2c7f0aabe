//! Test: dependency ordering and the concurrency bound

use crate::helpers::*;
use dagflow::core::config::RunOptions;
use dagflow::core::state::PipelineState;
use dagflow::core::step::StepDefinition;
use dagflow::execution::ExecutionEngine;
use std::sync::Arc;
use std::time::Duration;

/// {A, B (dep A), C} with a limit of two: A and C start together, B waits for A
#[tokio::test]
async fn test_independent_steps_share_the_slots() {
    let executor = Arc::new(ScriptedExecutor::new().with_default_delay(Duration::from_millis(50)));
    let engine = ExecutionEngine::new(executor.clone(), RunOptions::default().with_max_concurrency(2));

    let run = engine
        .start(pipeline(vec![
            StepDefinition::new("A"),
            StepDefinition::new("B").depends_on(["A"]),
            StepDefinition::new("C"),
        ]))
        .unwrap();
    let tracker = run.tracker().clone();
    let report = run.wait().await;

    assert_pipeline_succeeded(&report);
    for id in ["A", "B", "C"] {
        assert_step_succeeded(&report, id);
    }

    let order = executor.started_order();
    let mut first_two = order[..2].to_vec();
    first_two.sort();
    assert_eq!(first_two, vec!["A", "C"]);
    assert_eq!(order[2], "B");

    assert_ran_after(&report, "B", "A");
    assert_eq!(tracker.max_observed_concurrency(), 2);
    assert_eq!(tracker.status(), PipelineState::Succeeded);
}

#[tokio::test]
async fn test_in_flight_never_exceeds_limit() {
    let executor = Arc::new(ScriptedExecutor::new().with_default_delay(Duration::from_millis(15)));
    let steps = (0..12).map(|i| StepDefinition::new(format!("step{:02}", i))).collect();

    let engine = ExecutionEngine::new(executor.clone(), RunOptions::default().with_max_concurrency(3));
    let run = engine.start(pipeline(steps)).unwrap();
    let tracker = run.tracker().clone();
    let report = run.wait().await;

    assert_pipeline_succeeded(&report);
    assert_eq!(report.records.len(), 12);
    assert_eq!(executor.peak_concurrency(), 3);
    assert_eq!(tracker.max_observed_concurrency(), 3);
    assert_eq!(tracker.running_count(), 0);
}

#[tokio::test]
async fn test_limit_of_one_runs_in_id_order() {
    let executor = Arc::new(ScriptedExecutor::new().with_default_delay(Duration::from_millis(1)));
    let report = run_pipeline(
        executor.clone(),
        RunOptions::default().with_max_concurrency(1),
        vec![
            StepDefinition::new("c"),
            StepDefinition::new("b"),
            StepDefinition::new("a"),
            StepDefinition::new("aa").depends_on(["c"]),
        ],
    )
    .await;

    assert_pipeline_succeeded(&report);
    assert_eq!(executor.started_order(), vec!["a", "b", "c", "aa"]);
}

/// Diamond: d waits for both b and c
#[tokio::test]
async fn test_diamond_waits_for_all_dependencies() {
    let executor = ScriptedExecutor::new()
        .slow("b", Duration::from_millis(10))
        .slow("c", Duration::from_millis(60));
    let report = run_pipeline(
        executor,
        RunOptions::default(),
        vec![
            StepDefinition::new("a"),
            StepDefinition::new("b").depends_on(["a"]),
            StepDefinition::new("c").depends_on(["a"]),
            StepDefinition::new("d").depends_on(["b", "c"]),
        ],
    )
    .await;

    assert_pipeline_succeeded(&report);
    assert_ran_after(&report, "b", "a");
    assert_ran_after(&report, "c", "a");
    assert_ran_after(&report, "d", "b");
    assert_ran_after(&report, "d", "c");
}

#[tokio::test]
async fn test_long_chain_terminates() {
    let steps = (0..50)
        .map(|i| {
            let step = StepDefinition::new(format!("s{:03}", i));
            if i == 0 {
                step
            } else {
                step.depends_on([format!("s{:03}", i - 1)])
            }
        })
        .collect();

    let executor = ScriptedExecutor::new().with_default_delay(Duration::ZERO);
    let report = run_pipeline(executor, RunOptions::default(), steps).await;

    assert_pipeline_succeeded(&report);
    let order: Vec<&str> = report.records.iter().map(|r| r.step_id.as_str()).collect();
    let expected: Vec<String> = (0..50).map(|i| format!("s{:03}", i)).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_tracker_reports_running_step() {
    let executor = ScriptedExecutor::new().slow("a", Duration::from_millis(200));
    let engine = ExecutionEngine::new(executor, RunOptions::default());
    let run = engine
        .start(pipeline(vec![
            StepDefinition::new("a"),
            StepDefinition::new("b").depends_on(["a"]),
        ]))
        .unwrap();

    let tracker = run.tracker().clone();
    assert!(
        eventually(Duration::from_secs(1), || tracker.running_count() == 1).await,
        "step a never started"
    );
    assert_eq!(tracker.status(), PipelineState::Running);
    assert_eq!(
        tracker.step_status("b").unwrap(),
        dagflow::StepState::Pending
    );
    assert!(tracker.step_status("missing").is_err());

    let report = run.wait().await;
    assert_pipeline_succeeded(&report);
    assert!(tracker.is_terminal());
    assert_eq!(tracker.progress(), (2, 2));
}
