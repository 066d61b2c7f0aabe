//! Core domain models for pipelines
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, their states, and their XML configuration.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;

pub use config::{FailurePolicy, PipelineConfig, RunOptions};
pub use error::{ConfigError, CycleError, UnknownStepError};
pub use pipeline::*;
pub use state::*;
pub use step::*;
