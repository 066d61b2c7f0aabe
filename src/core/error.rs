//! Error types for loading and querying pipelines

use thiserror::Error;

/// A dependency cycle found while building the step graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected in dependency graph: {}", .path.join(" -> "))]
pub struct CycleError {
    /// Step ids along the cycle, first id repeated at the end
    pub path: Vec<String>,
}

/// Errors raised while turning a configuration document into a pipeline.
///
/// All of these are fatal: no step starts when loading fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read pipeline file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed pipeline document: {0}")]
    Malformed(#[from] quick_xml::DeError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate step ID: {0}")]
    DuplicateStep(String),

    #[error("Step '{step}' depends on non-existent step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Returned by status queries for an id that is not part of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown step: {0}")]
pub struct UnknownStepError(pub String);
