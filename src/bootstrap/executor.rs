//! Bounded retry of a single step
//!
//! A step gets at most [`RetryPolicy::max_attempts`] attempts. An attempt is
//! `install` followed by `health_check` (when the step has one); a failed
//! health check consumes the same attempt budget as a failed install. Attempt
//! `n` (counting from zero) waits `n * delay_step` first, so the default
//! policy sleeps 10s then 20s.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::result::{StepResult, StepStatus};
use super::step::Step;
use crate::component::{Component, ComponentSet};
use crate::{Error, Result, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_STEP};

/// Attempt budget and delay for step retries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_step: DEFAULT_RETRY_DELAY_STEP,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` total attempts (at least one)
    pub fn new(max_attempts: u32, delay_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay_step,
        }
    }

    /// Total attempts per step, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt` (zero-based). Linear, not exponential.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_step * attempt
    }
}

/// Runs one step to a terminal [`StepResult`]
#[derive(Clone, Debug)]
pub struct RetryExecutor {
    components: ComponentSet,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryExecutor {
    /// Executor over `components` with the given policy
    pub fn new(components: ComponentSet, policy: RetryPolicy) -> Self {
        Self {
            components,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon retry sleeps and in-flight calls once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `step`, retrying within the policy's attempt budget.
    ///
    /// Skipped steps and dry runs return without calling the component. The
    /// executor never rolls anything back; it only reports.
    pub async fn execute_step(&self, step: &Step, dry_run: bool) -> StepResult {
        let started = Instant::now();
        let mut result = StepResult::started(step);

        if step.skip {
            info!(step = %step.name, "Step skipped by configuration");
            return result.finish(
                StepStatus::Skipped,
                "Skipped by configuration",
                None,
                started.elapsed(),
            );
        }

        let component = self.components.get(step.component);
        let mut last_error: Option<Error> = None;

        for attempt in 0..self.policy.max_attempts {
            if dry_run {
                info!(step = %step.name, component = %step.component, "Dry run, not executing");
                return result.finish(
                    StepStatus::Success,
                    "Dry-run simulation",
                    None,
                    started.elapsed(),
                );
            }

            if attempt > 0 {
                result.status = StepStatus::Retrying;
                result.retries = attempt;
                let delay = self.policy.delay_for(attempt);
                warn!(
                    step = %step.name,
                    attempt = attempt,
                    error = %last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                    delay_ms = delay.as_millis() as u64,
                    "Step failed, retrying"
                );
                if self.sleep(delay).await.is_err() {
                    return cancelled(result, started);
                }
            }

            result.status = StepStatus::Running;
            debug!(step = %step.name, attempt = attempt + 1, "Starting attempt");

            match self.attempt(step, component).await {
                Ok(()) => {
                    info!(
                        step = %step.name,
                        retries = result.retries,
                        "Step completed"
                    );
                    return result.finish(
                        StepStatus::Success,
                        "Completed successfully",
                        None,
                        started.elapsed(),
                    );
                }
                Err(e) if e.is_cancelled() => return cancelled(result, started),
                Err(e) => last_error = Some(e),
            }
        }

        let error = last_error.map(|e| e.to_string());
        error!(
            step = %step.name,
            attempts = self.policy.max_attempts,
            error = %error.as_deref().unwrap_or_default(),
            "Step failed after max attempts"
        );
        result.finish(
            StepStatus::Failed,
            format!("Failed after {} attempts", self.policy.max_attempts),
            error,
            started.elapsed(),
        )
    }

    async fn attempt(&self, step: &Step, component: &dyn Component) -> Result<()> {
        self.cancellable(component.install()).await?;

        if step.health_check {
            self.cancellable(component.health_check())
                .await
                .map_err(|e| match e {
                    Error::Cancelled => e,
                    e => Error::health_check(step.component.as_str(), e),
                })?;
        }
        Ok(())
    }

    /// Run `future` unless cancellation is already requested or arrives first.
    ///
    /// Checked before the call is made so a cancelled run never starts new work.
    async fn cancellable<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = future => result,
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn cancelled(result: StepResult, started: Instant) -> StepResult {
    warn!(step = %result.name, "Step cancelled");
    result.finish(
        StepStatus::Failed,
        "Cancelled",
        Some(Error::Cancelled.to_string()),
        started.elapsed(),
    )
}
