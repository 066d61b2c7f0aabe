//! Step domain model

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDefinition {
    /// Unique step identifier
    pub id: String,

    /// Step IDs this step depends on, in declaration order
    pub dependencies: Vec<String>,

    /// Opaque parameters handed to the executor
    pub parameters: BTreeMap<String, String>,

    /// Hard limit on how long the step may run
    pub timeout: Option<Duration>,

    /// Names of resources the step holds exclusively while running
    pub resources: Vec<String>,
}

impl StepDefinition {
    /// Create a step with no dependencies, parameters, or timeout
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            parameters: BTreeMap::new(),
            timeout: None,
            resources: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// Look up a parameter value
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}
