//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall pipeline status, derived from the states of all steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Run has been created but the scheduler has not started
    Idle,
    /// At least one step is not yet terminal
    Running,
    /// Every step Succeeded or was Skipped, none Failed
    Succeeded,
    /// At least one step Failed
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "Idle",
            PipelineState::Running => "Running",
            PipelineState::Succeeded => "Succeeded",
            PipelineState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Why a step ended up Failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The executor reported a failure
    Error(String),
    /// The step ran past its configured timeout
    TimedOut,
    /// The pipeline was cancelled while the step was running
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Error(reason) => write!(f, "{}", reason),
            FailureKind::TimedOut => f.write_str("timed out"),
            FailureKind::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// State of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    /// Waiting for dependencies
    Pending,
    /// Dependencies satisfied, waiting for a free slot
    Ready,
    /// Handed to the executor
    Running { started_at: DateTime<Utc> },
    /// Executor reported success
    Succeeded,
    /// Executor failed, timed out, or was cancelled
    Failed(FailureKind),
    /// Never started (failed/skipped dependency, fail-fast, or cancellation)
    Skipped { reason: String },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded | StepState::Failed(_) | StepState::Skipped { .. }
        )
    }

    /// Short name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            StepState::Pending => "Pending",
            StepState::Ready => "Ready",
            StepState::Running { .. } => "Running",
            StepState::Succeeded => "Succeeded",
            StepState::Failed(_) => "Failed",
            StepState::Skipped { .. } => "Skipped",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Failed(kind) => write!(f, "Failed({})", kind),
            StepState::Skipped { reason } => write!(f, "Skipped({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// What a step executor reports back for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }

    /// Human-readable error detail, `None` on success
    pub fn error_detail(&self) -> Option<String> {
        self.failure().map(|kind| kind.to_string())
    }

    /// The failure this outcome represents, `None` on success
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            StepOutcome::Succeeded => None,
            StepOutcome::Failed(reason) => Some(FailureKind::Error(reason.clone())),
            StepOutcome::TimedOut => Some(FailureKind::TimedOut),
            StepOutcome::Cancelled => Some(FailureKind::Cancelled),
        }
    }

    /// The terminal step state this outcome leads to
    pub fn to_step_state(&self) -> StepState {
        match self.failure() {
            None => StepState::Succeeded,
            Some(kind) => StepState::Failed(kind),
        }
    }
}

/// Audit entry for one step attempt. Appended once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: StepOutcome,
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(
        step_id: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        outcome: StepOutcome,
    ) -> Self {
        let error = outcome.error_detail();
        Self {
            step_id: step_id.into(),
            started_at,
            ended_at,
            outcome,
            error,
        }
    }

    /// Wall-clock time the attempt took
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.signed_duration_since(self.started_at)
    }
}
