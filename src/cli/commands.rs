//! CLI command definitions

use crate::core::config::{FailurePolicy, RunOptions};
use crate::core::error::ConfigError;
use crate::execution::RetryStrategy;
use clap::Args;
use std::time::Duration;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline XML file
    #[arg(short, long)]
    pub file: String,

    /// Maximum number of steps running at once (overrides the file)
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// What to do when a step fails (overrides the file)
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Retry failed steps this many times
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Delay between retries in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,
}

impl RunCommand {
    /// Apply command-line overrides on top of the file's options
    pub fn apply_overrides(&self, mut options: RunOptions) -> Result<RunOptions, ConfigError> {
        if let Some(max) = self.max_concurrency {
            if max == 0 {
                return Err(ConfigError::Validation(
                    "--max-concurrency must be at least 1".to_string(),
                ));
            }
            options = options.with_max_concurrency(max);
        }
        if let Some(policy) = self.policy {
            options = options.with_failure_policy(policy.into());
        }
        Ok(options)
    }

    /// Retry strategy requested on the command line, if any
    pub fn retry_strategy(&self) -> Result<Option<RetryStrategy>, ConfigError> {
        if self.retries == 0 {
            return Ok(None);
        }
        RetryStrategy::fixed(self.retries, Duration::from_millis(self.retry_delay_ms)).map(Some)
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline XML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Failure policy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PolicyArg {
    FailFast,
    BestEffort,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FailFast => FailurePolicy::FailFast,
            PolicyArg::BestEffort => FailurePolicy::BestEffort,
        }
    }
}
