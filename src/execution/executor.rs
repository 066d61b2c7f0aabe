//! Step executors - the work a step actually does
//!
//! The engine only depends on the [`StepExecutor`] contract. Concrete step
//! kinds are supplied by the caller; this module ships a shell adapter and
//! a retrying decorator.

use crate::core::{error::ConfigError, state::StepOutcome, step::StepDefinition};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs one step's unit of work.
///
/// Implementations are invoked concurrently for different steps and must not
/// share mutable state between them. `cancel` fires when the pipeline is
/// cancelled; stopping early is cooperative.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &StepDefinition, cancel: CancellationToken) -> StepOutcome;
}

#[async_trait]
impl<E: StepExecutor + ?Sized> StepExecutor for Arc<E> {
    async fn execute(&self, step: &StepDefinition, cancel: CancellationToken) -> StepOutcome {
        (**self).execute(step, cancel).await
    }
}

/// Parameter holding the shell command for [`ShellExecutor`]
pub const COMMAND_PARAM: &str = "command";

/// Lines of stderr kept in a failure reason
const STDERR_TAIL_LINES: usize = 5;

/// Runs the step's `command` parameter with `sh -c`
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell binary (must accept `-c <command>`)
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, step: &StepDefinition, cancel: CancellationToken) -> StepOutcome {
        let Some(command) = step.parameter(COMMAND_PARAM) else {
            return StepOutcome::Failed(format!("missing '{}' parameter", COMMAND_PARAM));
        };

        info!("Executing step: {}", step.id);
        debug!("Command for step {}: {}", step.id, command);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &step.parameters {
            if key != COMMAND_PARAM {
                cmd.env(format!("DAGFLOW_PARAM_{}", key.to_uppercase()), value);
            }
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn command for step {}: {}", step.id, e);
                return StepOutcome::Failed(format!("failed to spawn '{}': {}", self.shell, e));
            }
        };

        // Dropping the wait future kills the child (kill_on_drop)
        tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(output) if output.status.success() => {
                    debug!(
                        "Step {} stdout: {}",
                        step.id,
                        String::from_utf8_lossy(&output.stdout).trim_end()
                    );
                    StepOutcome::Succeeded
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
                    let tail: Vec<&str> = tail.into_iter().rev().collect();
                    let mut reason = format!("command exited with {}", output.status);
                    if !tail.is_empty() {
                        reason.push_str(": ");
                        reason.push_str(&tail.join("\n"));
                    }
                    StepOutcome::Failed(reason)
                }
                Err(e) => StepOutcome::Failed(format!("failed to wait for command: {}", e)),
            },
            _ = cancel.cancelled() => {
                info!("Step {} cancelled, killing command", step.id);
                StepOutcome::Cancelled
            }
        }
    }
}

/// When and how long to wait before retrying a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Never retry
    None,
    /// Retry up to `max_retries` times with a constant delay
    Fixed { max_retries: u32, delay: Duration },
    /// Retry forever with a constant delay
    Infinite { delay: Duration },
    /// Retry up to `max_retries` times, delay growing by `multiplier` each time
    ExponentialBackoff {
        max_retries: u32,
        base_delay: Duration,
        multiplier: f64,
    },
}

impl RetryStrategy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Result<Self, ConfigError> {
        if max_retries == 0 {
            return Err(ConfigError::Validation(
                "max_retries must be greater than 0".to_string(),
            ));
        }
        Ok(RetryStrategy::Fixed { max_retries, delay })
    }

    pub fn infinite(delay: Duration) -> Self {
        RetryStrategy::Infinite { delay }
    }

    pub fn exponential_backoff(
        max_retries: u32,
        base_delay: Duration,
        multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if max_retries == 0 {
            return Err(ConfigError::Validation(
                "max_retries must be greater than 0".to_string(),
            ));
        }
        if base_delay.is_zero() {
            return Err(ConfigError::Validation(
                "base_delay must be greater than 0".to_string(),
            ));
        }
        if !(multiplier > 1.0) {
            return Err(ConfigError::Validation(
                "multiplier must be greater than 1".to_string(),
            ));
        }
        Ok(RetryStrategy::ExponentialBackoff {
            max_retries,
            base_delay,
            multiplier,
        })
    }

    /// Whether another attempt is allowed after `retries` retries so far
    pub fn should_retry(&self, retries: u32) -> bool {
        match self {
            RetryStrategy::None => false,
            RetryStrategy::Fixed { max_retries, .. } => retries < *max_retries,
            RetryStrategy::Infinite { .. } => true,
            RetryStrategy::ExponentialBackoff { max_retries, .. } => retries < *max_retries,
        }
    }

    /// Delay before retry number `retries + 1`
    pub fn delay(&self, retries: u32) -> Duration {
        match self {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Fixed { delay, .. } | RetryStrategy::Infinite { delay } => *delay,
            RetryStrategy::ExponentialBackoff {
                base_delay,
                multiplier,
                ..
            } => base_delay.mul_f64(multiplier.powi(retries as i32)),
        }
    }
}

/// Wraps an executor and retries `Failed` outcomes per a [`RetryStrategy`].
///
/// Timeouts and cancellations are never retried. The whole retry loop runs
/// inside one step attempt, so a step timeout bounds it too.
pub struct RetryingExecutor<E> {
    inner: E,
    strategy: RetryStrategy,
}

impl<E: StepExecutor> RetryingExecutor<E> {
    pub fn new(inner: E, strategy: RetryStrategy) -> Self {
        Self { inner, strategy }
    }
}

#[async_trait]
impl<E: StepExecutor> StepExecutor for RetryingExecutor<E> {
    async fn execute(&self, step: &StepDefinition, cancel: CancellationToken) -> StepOutcome {
        let mut retries = 0;
        loop {
            let outcome = self.inner.execute(step, cancel.clone()).await;
            let StepOutcome::Failed(reason) = &outcome else {
                return outcome;
            };

            if !self.strategy.should_retry(retries) {
                if retries > 0 {
                    error!("Retries exhausted for step {}", step.id);
                }
                return outcome;
            }

            let delay = self.strategy.delay(retries);
            retries += 1;
            warn!(
                "Step {} failed ({}), retry {} in {:?}",
                step.id, reason, retries, delay
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
            }
        }
    }
}
