//! dagflow - run a dependency graph of steps with bounded concurrency

pub mod cli;
pub mod core;
pub mod execution;

// Re-export commonly used types
pub use core::{
    ConfigError, CycleError, FailurePolicy, PipelineConfig, PipelineDefinition, PipelineState,
    RunOptions, StepDefinition, StepOutcome, StepState, UnknownStepError,
};
pub use execution::{
    DependencyGraph, ExecutionEngine, ExecutionEvent, PipelineReport, PipelineRun,
    PipelineTracker, RetryStrategy, RetryingExecutor, ShellExecutor, StepExecutor,
};
