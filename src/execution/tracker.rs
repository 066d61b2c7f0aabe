//! Pipeline state tracker - the queryable view of a run
//!
//! Readers may poll from any thread. Only the engine's run loop writes, and
//! every write is a short critical section that is never held across an
//! await point.

use crate::core::{
    error::UnknownStepError,
    pipeline::PipelineDefinition,
    state::{ExecutionRecord, PipelineState, StepState},
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

#[derive(Debug)]
struct TrackerInner {
    status: PipelineState,
    steps: BTreeMap<String, StepState>,
    records: Vec<ExecutionRecord>,
    running: usize,
    max_running: usize,
}

/// Thread-safe handle to the state of one pipeline run. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PipelineTracker {
    inner: Arc<RwLock<TrackerInner>>,
}

impl PipelineTracker {
    /// Create a tracker with every step Pending and the pipeline Idle
    pub fn new(definition: &PipelineDefinition) -> Self {
        let steps = definition
            .steps()
            .iter()
            .map(|s| (s.id.clone(), StepState::Pending))
            .collect();

        Self {
            inner: Arc::new(RwLock::new(TrackerInner {
                status: PipelineState::Idle,
                steps,
                records: Vec::new(),
                running: 0,
                max_running: 0,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest committed pipeline state
    pub fn status(&self) -> PipelineState {
        self.read().status
    }

    /// Latest committed state of one step
    pub fn step_status(&self, id: &str) -> Result<StepState, UnknownStepError> {
        self.read()
            .steps
            .get(id)
            .cloned()
            .ok_or_else(|| UnknownStepError(id.to_string()))
    }

    /// Snapshot of every step state, keyed by id
    pub fn step_states(&self) -> BTreeMap<String, StepState> {
        self.read().steps.clone()
    }

    /// Snapshot of the execution record log, in append order
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.read().records.clone()
    }

    /// Number of steps currently Running
    pub fn running_count(&self) -> usize {
        self.read().running
    }

    /// Highest number of steps that were Running at the same time
    pub fn max_observed_concurrency(&self) -> usize {
        self.read().max_running
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// (terminal steps, total steps)
    pub fn progress(&self) -> (usize, usize) {
        let inner = self.read();
        let done = inner.steps.values().filter(|s| s.is_terminal()).count();
        (done, inner.steps.len())
    }

    /// Move a step to a new state.
    ///
    /// Terminal states are final: a transition out of one is refused and
    /// `false` is returned.
    pub(crate) fn transition(&self, id: &str, new_state: StepState) -> bool {
        let old_state = {
            let mut inner = self.write();
            let Some(current) = inner.steps.get(id).cloned() else {
                drop(inner);
                warn!(step = %id, "Transition requested for unknown step");
                return false;
            };
            if current.is_terminal() {
                drop(inner);
                warn!(
                    step = %id,
                    from = %current,
                    to = %new_state,
                    "Refusing to leave terminal state"
                );
                return false;
            }

            let was_running = matches!(current, StepState::Running { .. });
            let is_running = matches!(new_state, StepState::Running { .. });
            if is_running && !was_running {
                inner.running += 1;
                inner.max_running = inner.max_running.max(inner.running);
            } else if was_running && !is_running {
                inner.running -= 1;
            }

            inner.steps.insert(id.to_string(), new_state.clone());
            current
        };

        let at = Utc::now().to_rfc3339();
        match &new_state {
            StepState::Failed(kind) => warn!(
                step = %id,
                from = old_state.name(),
                to = new_state.name(),
                at = %at,
                error = %kind,
                "Step state changed"
            ),
            StepState::Skipped { reason } => info!(
                step = %id,
                from = old_state.name(),
                to = new_state.name(),
                at = %at,
                reason = %reason,
                "Step state changed"
            ),
            _ => info!(
                step = %id,
                from = old_state.name(),
                to = new_state.name(),
                at = %at,
                "Step state changed"
            ),
        }

        true
    }

    pub(crate) fn append_record(&self, record: ExecutionRecord) {
        self.write().records.push(record);
    }

    pub(crate) fn set_status(&self, status: PipelineState) {
        let old = {
            let mut inner = self.write();
            let old = inner.status;
            if old.is_terminal() {
                return;
            }
            inner.status = status;
            old
        };
        if old != status {
            info!(from = %old, to = %status, "Pipeline state changed");
        }
    }
}
