//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod graph;
pub mod scheduler;
pub mod tracker;

pub use engine::{ExecutionEngine, ExecutionEvent, PipelineReport, PipelineRun};
pub use executor::{RetryStrategy, RetryingExecutor, ShellExecutor, StepExecutor};
pub use graph::DependencyGraph;
pub use scheduler::{ExecutionScheduler, ResourceLocks};
pub use tracker::PipelineTracker;
