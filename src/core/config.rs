//! Pipeline configuration from XML

use crate::core::{error::ConfigError, pipeline::PipelineDefinition, step::StepDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default number of steps allowed to run at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default time in-flight steps get to stop after cancellation
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// What happens to the rest of the pipeline when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop dispatching; every unstarted step is skipped
    #[default]
    FailFast,
    /// Skip only what depends on the failed step; keep running the rest
    BestEffort,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "best-effort" => Ok(FailurePolicy::BestEffort),
            other => Err(ConfigError::Validation(format!(
                "Unknown failure policy '{}' (expected 'fail-fast' or 'best-effort')",
                other
            ))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => f.write_str("fail-fast"),
            FailurePolicy::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOptions {
    /// Maximum number of steps running at once (at least 1)
    pub max_concurrency: usize,

    pub failure_policy: FailurePolicy,

    /// Timeout for steps that do not set their own
    pub default_timeout: Option<Duration>,

    /// How long in-flight steps get to stop after cancellation
    pub cancel_grace: Duration,
}

impl RunOptions {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            failure_policy: FailurePolicy::FailFast,
            default_timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Top-level pipeline document, the `<Pipeline>` element
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    #[serde(rename = "@name", default)]
    pub name: Option<String>,

    #[serde(rename = "@maxConcurrency", default)]
    pub max_concurrency: Option<usize>,

    /// `fail-fast` or `best-effort`
    #[serde(rename = "@failurePolicy", default)]
    pub failure_policy: Option<String>,

    #[serde(rename = "@defaultTimeoutMs", default)]
    pub default_timeout_ms: Option<u64>,

    #[serde(rename = "@cancelGraceMs", default)]
    pub cancel_grace_ms: Option<u64>,

    #[serde(rename = "Steps", default)]
    pub steps: Option<StepList>,
}

/// `<Steps>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepList {
    #[serde(rename = "Step", default)]
    pub steps: Vec<StepConfig>,
}

/// One `<Step>` declaration
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    #[serde(rename = "@Id", default)]
    pub id: Option<String>,

    #[serde(rename = "@timeoutMs", default)]
    pub timeout_ms: Option<u64>,

    /// Required, may be empty
    #[serde(rename = "Dependencies", default)]
    pub dependencies: Option<StepRefList>,

    #[serde(rename = "Resources", default)]
    pub resources: Option<ResourceList>,

    /// Required, may be empty
    #[serde(rename = "Parameters", default)]
    pub parameters: Option<ParameterList>,
}

/// `<Dependencies>`: references to other steps by id
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepRefList {
    #[serde(rename = "Step", default)]
    pub steps: Vec<StepRef>,
}

/// `<Step Id=".."/>` inside `<Dependencies>`
#[derive(Debug, Clone, Deserialize)]
pub struct StepRef {
    #[serde(rename = "@Id", default)]
    pub id: Option<String>,

    /// References must not declare dependencies of their own
    #[serde(rename = "Dependencies", default)]
    pub dependencies: Option<StepRefList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceList {
    #[serde(rename = "Resource", default)]
    pub resources: Vec<ResourceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "@Id", default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParameterList {
    #[serde(rename = "Param", default)]
    pub params: Vec<ParamConfig>,
}

/// `<Param name="..">value</Param>` or `<Param name=".." value=".."/>`
#[derive(Debug, Clone, Deserialize)]
pub struct ParamConfig {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,

    #[serde(rename = "@value", default)]
    pub value: Option<String>,

    #[serde(rename = "$text", default)]
    pub text: Option<String>,
}

impl PipelineConfig {
    /// Load pipeline configuration from an XML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_xml(&content)
    }

    /// Parse and validate pipeline configuration from an XML string
    pub fn from_xml(xml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = quick_xml::de::from_str(xml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole document, including the dependency graph
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run_options()?;
        self.to_definition()?;
        Ok(())
    }

    /// Pipeline name, falling back to "pipeline"
    pub fn pipeline_name(&self) -> &str {
        self.name.as_deref().unwrap_or("pipeline")
    }

    /// Number of declared steps
    pub fn step_count(&self) -> usize {
        self.steps.as_ref().map_or(0, |s| s.steps.len())
    }

    /// Run settings declared on the root element, defaults elsewhere
    pub fn run_options(&self) -> Result<RunOptions, ConfigError> {
        let mut options = RunOptions::default();

        if let Some(max) = self.max_concurrency {
            if max == 0 {
                return Err(ConfigError::Validation(
                    "maxConcurrency must be greater than 0".to_string(),
                ));
            }
            options.max_concurrency = max;
        }
        if let Some(policy) = &self.failure_policy {
            options.failure_policy = policy.parse()?;
        }
        if let Some(ms) = self.default_timeout_ms {
            options.default_timeout = Some(positive_millis("defaultTimeoutMs", ms)?);
        }
        if let Some(ms) = self.cancel_grace_ms {
            options.cancel_grace = Duration::from_millis(ms);
        }

        Ok(options)
    }

    /// Convert the document into a validated pipeline definition
    pub fn to_definition(&self) -> Result<PipelineDefinition, ConfigError> {
        let steps = self
            .steps
            .as_ref()
            .map(|list| list.steps.as_slice())
            .unwrap_or(&[])
            .iter()
            .enumerate()
            .map(|(index, step)| step.to_definition(index))
            .collect::<Result<Vec<_>, _>>()?;

        PipelineDefinition::new(self.pipeline_name(), steps)
    }
}

impl StepConfig {
    fn to_definition(&self, index: usize) -> Result<StepDefinition, ConfigError> {
        let id = required_id(self.id.as_deref(), || {
            format!("Step #{} is missing required attribute 'Id'", index + 1)
        })?;

        let dependencies = self.dependencies.as_ref().ok_or_else(|| {
            ConfigError::Validation(format!(
                "Step '{}' is missing required element <Dependencies>",
                id
            ))
        })?;
        let parameters = self.parameters.as_ref().ok_or_else(|| {
            ConfigError::Validation(format!(
                "Step '{}' is missing required element <Parameters>",
                id
            ))
        })?;

        let mut step = StepDefinition::new(id.clone());

        for dep in &dependencies.steps {
            let dep_id = required_id(dep.id.as_deref(), || {
                format!("Dependency of step '{}' is missing required attribute 'Id'", id)
            })?;
            if dep.dependencies.as_ref().is_some_and(|d| !d.steps.is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "Dependency '{}' of step '{}' must not declare its own dependencies",
                    dep_id, id
                )));
            }
            if !step.dependencies.contains(&dep_id) {
                step.dependencies.push(dep_id);
            }
        }

        for param in &parameters.params {
            let name = required_id(param.name.as_deref(), || {
                format!("Parameter of step '{}' is missing required attribute 'name'", id)
            })?;
            let value = param
                .value
                .clone()
                .or_else(|| param.text.clone())
                .unwrap_or_default();
            step.parameters.insert(name, value);
        }

        if let Some(resources) = &self.resources {
            for resource in &resources.resources {
                let name = required_id(resource.id.as_deref(), || {
                    format!("Resource of step '{}' is missing required attribute 'Id'", id)
                })?;
                step.resources.push(name);
            }
        }

        if let Some(ms) = self.timeout_ms {
            step.timeout = Some(positive_millis("timeoutMs", ms)?);
        }

        Ok(step)
    }
}

fn required_id(value: Option<&str>, message: impl FnOnce() -> String) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::Validation(message())),
    }
}

fn positive_millis(field: &str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::Validation(format!(
            "{} must be greater than 0",
            field
        )));
    }
    Ok(Duration::from_millis(ms))
}
