//! Main execution engine - orchestrates the entire pipeline run
//!
//! A run is a single tokio task (the run loop) that owns every state
//! mutation and every deadline. Steps execute as separate tasks in a
//! `JoinSet`; when one finishes or overruns its timeout, the loop records
//! the outcome, applies the failure policy, and dispatches whatever became
//! ready. A step task that ignores its abort is left behind, never waited on.

use crate::{
    core::{
        config::{FailurePolicy, RunOptions},
        error::ConfigError,
        pipeline::PipelineDefinition,
        state::{ExecutionRecord, PipelineState, StepOutcome, StepState},
        step::StepDefinition,
    },
    execution::{
        executor::StepExecutor,
        graph::DependencyGraph,
        scheduler::ExecutionScheduler,
        tracker::PipelineTracker,
    },
};
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_id: String,
    },
    StepFinished {
        record: ExecutionRecord,
    },
    StepSkipped {
        step_id: String,
        reason: String,
    },
    PipelineFinished {
        execution_id: Uuid,
        status: PipelineState,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Final result of a run, handed back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub status: PipelineState,
    pub steps: BTreeMap<String, StepState>,
    pub records: Vec<ExecutionRecord>,
}

impl PipelineReport {
    fn from_tracker(execution_id: Uuid, pipeline_name: String, tracker: &PipelineTracker) -> Self {
        Self {
            execution_id,
            pipeline_name,
            status: tracker.status(),
            steps: tracker.step_states(),
            records: tracker.records(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineState::Succeeded
    }

    pub fn step_state(&self, step_id: &str) -> Option<&StepState> {
        self.steps.get(step_id)
    }

    /// Records for one step, in attempt order
    pub fn records_for<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a ExecutionRecord> + 'a {
        self.records.iter().filter(move |r| r.step_id == step_id)
    }
}

/// Handle to a pipeline that is running in the background
pub struct PipelineRun {
    execution_id: Uuid,
    pipeline_name: String,
    tracker: PipelineTracker,
    cancel: CancellationToken,
    handle: JoinHandle<PipelineReport>,
}

impl PipelineRun {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Queryable state of the run
    pub fn tracker(&self) -> &PipelineTracker {
        &self.tracker
    }

    /// Ask the run to stop. Unstarted steps are skipped; running steps are
    /// signalled and get the grace period to finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> PipelineReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!("Run loop for {} ended abnormally: {}", self.pipeline_name, e);
                self.tracker.set_status(PipelineState::Failed);
                PipelineReport::from_tracker(self.execution_id, self.pipeline_name, &self.tracker)
            }
        }
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    executor: Arc<dyn StepExecutor>,
    options: RunOptions,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl ExecutionEngine {
    pub fn new<E: StepExecutor + 'static>(executor: E, options: RunOptions) -> Self {
        Self {
            executor: Arc::new(executor),
            options,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Start a run in the background. Must be called inside a tokio runtime.
    pub fn start(&self, definition: PipelineDefinition) -> Result<PipelineRun, ConfigError> {
        let graph = DependencyGraph::build(&definition)?;
        let execution_id = Uuid::new_v4();
        let tracker = PipelineTracker::new(&definition);
        let cancel = CancellationToken::new();
        let pipeline_name = definition.name.clone();

        let run_loop = RunLoop {
            execution_id,
            definition: Arc::new(definition),
            graph,
            executor: self.executor.clone(),
            options: self.options.clone(),
            tracker: tracker.clone(),
            scheduler: ExecutionScheduler::new(self.options.max_concurrency),
            handlers: self.event_handlers.clone(),
            cancel: cancel.clone(),
            tasks: JoinSet::new(),
            deadlines: DelayQueue::new(),
            in_flight: HashMap::new(),
            succeeded: HashSet::new(),
            settled: HashSet::new(),
            failed: false,
            halted: false,
            cancelled: false,
        };
        let handle = tokio::spawn(run_loop.run());

        Ok(PipelineRun {
            execution_id,
            pipeline_name,
            tracker,
            cancel,
            handle,
        })
    }

    /// Execute the entire pipeline and wait for it to finish
    pub async fn execute(&self, definition: PipelineDefinition) -> Result<PipelineReport, ConfigError> {
        Ok(self.start(definition)?.wait().await)
    }
}

/// What a step task reports back to the run loop
struct StepCompletion {
    step_id: String,
    ended_at: DateTime<Utc>,
    outcome: StepOutcome,
}

/// Bookkeeping for one running step
struct InFlight {
    started_at: DateTime<Utc>,
    abort: AbortHandle,
    deadline: Option<delay_queue::Key>,
}

struct RunLoop {
    execution_id: Uuid,
    definition: Arc<PipelineDefinition>,
    graph: DependencyGraph,
    executor: Arc<dyn StepExecutor>,
    options: RunOptions,
    tracker: PipelineTracker,
    scheduler: ExecutionScheduler,
    handlers: Arc<Mutex<Vec<EventHandler>>>,
    cancel: CancellationToken,
    tasks: JoinSet<StepCompletion>,
    /// Step timeouts, keyed by step id
    deadlines: DelayQueue<String>,
    in_flight: HashMap<String, InFlight>,
    succeeded: HashSet<String>,
    /// Steps that are running or terminal
    settled: HashSet<String>,
    failed: bool,
    /// No further dispatch (fail-fast triggered or cancelled)
    halted: bool,
    cancelled: bool,
}

impl RunLoop {
    async fn run(mut self) -> PipelineReport {
        info!(
            "Starting pipeline execution: {} ({})",
            self.definition.name, self.execution_id
        );
        self.tracker.set_status(PipelineState::Running);
        self.emit(ExecutionEvent::PipelineStarted {
            execution_id: self.execution_id,
            pipeline_name: self.definition.name.clone(),
            total_steps: self.definition.len(),
        });

        if self.cancel.is_cancelled() {
            self.cancel_run().await;
        } else {
            self.advance();
        }

        while !self.in_flight.is_empty() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !self.cancelled => {
                    self.cancel_run().await;
                }
                Some(expired) = self.deadlines.next(), if !self.deadlines.is_empty() => {
                    self.time_out(expired.into_inner());
                    self.advance();
                }
                joined = self.tasks.join_next() => {
                    if !self.joined(joined) {
                        break;
                    }
                    self.advance();
                }
            }
        }

        // Tasks still here were aborted but are stuck in blocking code
        self.tasks.detach_all();
        self.finish()
    }

    /// Mark newly ready steps and dispatch as many as the limits allow
    fn advance(&mut self) {
        if self.halted {
            return;
        }

        let ready = self.graph.ready_steps(&self.succeeded, &self.settled);
        for step_id in &ready {
            if matches!(self.tracker.step_status(step_id), Ok(StepState::Pending)) {
                self.tracker.transition(step_id, StepState::Ready);
            }
        }

        let next = self
            .scheduler
            .next_steps(&ready, self.in_flight.len(), &self.definition);
        for step_id in next {
            self.dispatch(step_id);
        }
    }

    fn dispatch(&mut self, step_id: String) {
        let Some(step) = self.definition.step(&step_id).cloned() else {
            return;
        };

        let started_at = Utc::now();
        self.settled.insert(step_id.clone());
        self.tracker
            .transition(&step_id, StepState::Running { started_at });
        self.emit(ExecutionEvent::StepStarted {
            step_id: step_id.clone(),
        });

        let deadline = step
            .timeout
            .or(self.options.default_timeout)
            .map(|limit| self.deadlines.insert(step_id.clone(), limit));
        let executor = self.executor.clone();
        let token = self.cancel.child_token();
        let abort = self.tasks.spawn(run_step(executor, step, token));

        self.in_flight.insert(
            step_id,
            InFlight {
                started_at,
                abort,
                deadline,
            },
        );
    }

    /// Handle one `join_next` result; `false` once the set is empty
    fn joined(&mut self, joined: Option<Result<StepCompletion, tokio::task::JoinError>>) -> bool {
        match joined {
            Some(Ok(completion)) => self.complete(completion),
            // Aborted after a timeout or the cancellation grace; already recorded
            Some(Err(e)) if e.is_cancelled() => {}
            Some(Err(e)) => error!("Step task failed to join: {}", e),
            None => return false,
        }
        true
    }

    /// Take a step out of flight, freeing its slot and its deadline
    fn land(&mut self, step_id: &str) -> Option<DateTime<Utc>> {
        let entry = self.in_flight.remove(step_id)?;
        if let Some(key) = entry.deadline {
            self.deadlines.try_remove(&key);
        }
        self.scheduler.release(step_id);
        Some(entry.started_at)
    }

    /// Force an overrunning step to Failed(TimedOut) and abort its task
    fn time_out(&mut self, step_id: String) {
        let Some(entry) = self.in_flight.get_mut(&step_id) else {
            return;
        };
        // The key was consumed by the expiry
        entry.deadline = None;
        entry.abort.abort();

        warn!("Timeout for step {}", step_id);
        self.settle(step_id, StepOutcome::TimedOut, Utc::now());
    }

    fn complete(&mut self, completion: StepCompletion) {
        let StepCompletion {
            step_id,
            ended_at,
            outcome,
        } = completion;
        self.settle(step_id, outcome, ended_at);
    }

    /// Record a step's final outcome and apply the failure policy.
    ///
    /// No-op for a step that is no longer in flight, so a late completion
    /// after a timeout or the cancellation grace is dropped.
    fn settle(&mut self, step_id: String, outcome: StepOutcome, ended_at: DateTime<Utc>) {
        let Some(started_at) = self.land(&step_id) else {
            return;
        };

        let record = ExecutionRecord::new(step_id.clone(), started_at, ended_at, outcome.clone());
        self.tracker.append_record(record.clone());
        self.tracker.transition(&step_id, outcome.to_step_state());
        self.emit(ExecutionEvent::StepFinished { record });

        if outcome.is_success() {
            self.succeeded.insert(step_id);
            return;
        }

        self.failed = true;
        let reason = format!("dependency '{}' failed", step_id);
        for dependent in self.graph.transitive_dependents(&step_id) {
            self.skip(&dependent, &reason);
        }

        if self.options.failure_policy == FailurePolicy::FailFast && !self.halted {
            warn!(
                "Step {} failed, failing fast; waiting for {} in-flight step(s)",
                step_id,
                self.in_flight.len()
            );
            self.halted = true;
            self.skip_unstarted("pipeline failing fast");
        }
    }

    /// Skip a step that has not started yet
    fn skip(&mut self, step_id: &str, reason: &str) {
        if self.settled.contains(step_id) {
            return;
        }
        self.settled.insert(step_id.to_string());
        let skipped = self.tracker.transition(
            step_id,
            StepState::Skipped {
                reason: reason.to_string(),
            },
        );
        if skipped {
            self.emit(ExecutionEvent::StepSkipped {
                step_id: step_id.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    fn skip_unstarted(&mut self, reason: &str) {
        let unstarted: Vec<String> = self
            .graph
            .ids()
            .iter()
            .filter(|id| !self.settled.contains(*id))
            .cloned()
            .collect();
        for step_id in unstarted {
            self.skip(&step_id, reason);
        }
    }

    /// Skip everything unstarted, then give running steps the grace period
    /// before recording them as cancelled.
    async fn cancel_run(&mut self) {
        warn!(
            "Pipeline {} cancelled; {} step(s) in flight",
            self.definition.name,
            self.in_flight.len()
        );
        self.cancelled = true;
        self.halted = true;
        self.skip_unstarted("pipeline cancelled");

        let grace = tokio::time::sleep(self.options.cancel_grace);
        tokio::pin!(grace);

        while !self.in_flight.is_empty() {
            tokio::select! {
                _ = &mut grace => break,
                Some(expired) = self.deadlines.next(), if !self.deadlines.is_empty() => {
                    self.time_out(expired.into_inner());
                }
                joined = self.tasks.join_next() => {
                    if !self.joined(joined) {
                        break;
                    }
                }
            }
        }

        // Never wait on the aborted tasks: one stuck in blocking code would
        // hold the run past its grace period
        self.tasks.abort_all();
        self.tasks.detach_all();

        let mut stragglers: Vec<String> = self.in_flight.keys().cloned().collect();
        stragglers.sort();
        for step_id in stragglers {
            warn!("Step {} did not stop within the grace period", step_id);
            self.settle(step_id, StepOutcome::Cancelled, Utc::now());
        }
    }

    fn finish(mut self) -> PipelineReport {
        // Anything still in flight here lost its task without reporting back
        let mut lost: Vec<String> = self.in_flight.keys().cloned().collect();
        lost.sort();
        for step_id in lost {
            error!("Step {} ended without reporting an outcome", step_id);
            let outcome = StepOutcome::Failed("step task ended unexpectedly".to_string());
            self.settle(step_id, outcome, Utc::now());
        }

        let stranded = self.graph.ids().len() - self.settled.len();
        if stranded > 0 {
            error!("{} step(s) never became ready", stranded);
            self.failed = true;
            self.skip_unstarted("never became ready");
        }

        let status = if self.failed || self.cancelled {
            PipelineState::Failed
        } else {
            PipelineState::Succeeded
        };
        self.tracker.set_status(status);

        info!(
            "Pipeline execution finished: {} - {}",
            self.definition.name, status
        );
        self.emit(ExecutionEvent::PipelineFinished {
            execution_id: self.execution_id,
            status,
        });

        PipelineReport::from_tracker(self.execution_id, self.definition.name.clone(), &self.tracker)
    }

    /// Emit an event to all handlers. A panicking handler is logged and
    /// does not take the run loop down with it.
    fn emit(&self, event: ExecutionEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            let event = event.clone();
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!("Event handler panicked: {}", panic_message(panic.as_ref()));
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Body of one step task. Deadlines are owned by the run loop.
async fn run_step(
    executor: Arc<dyn StepExecutor>,
    step: StepDefinition,
    cancel: CancellationToken,
) -> StepCompletion {
    let outcome = AssertUnwindSafe(executor.execute(&step, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!("Step {} panicked: {}", step.id, message);
            StepOutcome::Failed(format!("step panicked: {}", message))
        });

    StepCompletion {
        step_id: step.id,
        ended_at: Utc::now(),
        outcome,
    }
}
