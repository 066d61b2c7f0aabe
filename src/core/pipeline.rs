//! Pipeline domain model

use crate::core::{error::ConfigError, step::StepDefinition};
use crate::execution::graph::DependencyGraph;
use std::collections::HashSet;

/// A validated, immutable pipeline definition.
///
/// Step ids are unique, every dependency names an existing step, and the
/// dependency relation is acyclic. Steps keep their declaration order.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    steps: Vec<StepDefinition>,
}

impl PipelineDefinition {
    /// Validate steps and build a definition
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Result<Self, ConfigError> {
        let mut seen_ids = HashSet::new();
        for step in &steps {
            if step.id.trim().is_empty() {
                return Err(ConfigError::Validation("Step ID must not be empty".to_string()));
            }
            if !seen_ids.insert(step.id.as_str()) {
                return Err(ConfigError::DuplicateStep(step.id.clone()));
            }
        }

        for step in &steps {
            for dep in &step.dependencies {
                if !seen_ids.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let definition = Self {
            name: name.into(),
            steps,
        };

        // Only the acyclicity check is needed here; the engine builds its own graph.
        DependencyGraph::build(&definition)?;

        Ok(definition)
    }

    /// Build a definition without any checks
    #[cfg(test)]
    pub(crate) fn new_unchecked(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
