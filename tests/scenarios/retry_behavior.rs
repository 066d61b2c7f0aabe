//! Test: opting into retries with RetryingExecutor

use crate::helpers::*;
use async_trait::async_trait;
use dagflow::core::config::RunOptions;
use dagflow::core::state::{FailureKind, StepOutcome};
use dagflow::core::step::StepDefinition;
use dagflow::execution::{RetryStrategy, RetryingExecutor, StepExecutor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fails the first `failures` calls, then succeeds
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StepExecutor for Flaky {
    async fn execute(&self, _step: &StepDefinition, _cancel: CancellationToken) -> StepOutcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            StepOutcome::Failed("flaky".to_string())
        } else {
            StepOutcome::Succeeded
        }
    }
}

#[tokio::test]
async fn test_retry_recovers_flaky_step() {
    let flaky = Arc::new(Flaky::new(2));
    let strategy = RetryStrategy::fixed(3, Duration::from_millis(5)).unwrap();
    let report = run_pipeline(
        RetryingExecutor::new(flaky.clone(), strategy),
        RunOptions::default(),
        vec![StepDefinition::new("a"), StepDefinition::new("b").depends_on(["a"])],
    )
    .await;

    assert_pipeline_succeeded(&report);
    // two failures on a, then one success each for a and b
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let flaky = Arc::new(Flaky::new(10));
    let strategy = RetryStrategy::fixed(2, Duration::from_millis(1)).unwrap();
    let report = run_pipeline(
        RetryingExecutor::new(flaky.clone(), strategy),
        RunOptions::default(),
        vec![StepDefinition::new("a")],
    )
    .await;

    assert_pipeline_failed(&report);
    assert_step_failed(&report, "a", FailureKind::Error("flaky".to_string()));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_timeout_bounds_the_whole_retry_loop() {
    let strategy = RetryStrategy::infinite(Duration::from_millis(10));
    let report = run_pipeline(
        RetryingExecutor::new(Flaky::new(usize::MAX), strategy),
        RunOptions::default(),
        vec![StepDefinition::new("a").with_timeout(Duration::from_millis(60))],
    )
    .await;

    assert_step_failed(&report, "a", FailureKind::TimedOut);
}
