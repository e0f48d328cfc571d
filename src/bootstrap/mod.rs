//! Bootstrap orchestration
//!
//! The [`Orchestrator`] walks the [`StepRegistry`] strictly in order, one step
//! at a time, through the [`RetryExecutor`]. The first step that ends
//! `Failed` stops the run: later steps are neither attempted nor reported, so
//! the result list is always a prefix of the registry.
//!
//! # Run Flow
//!
//! 1. Build the registry from the [`Config`] (skip flags included)
//! 2. Execute each step (skip, dry-run, retry with linear delay)
//! 3. Append its [`StepResult`] and notify the progress callback
//! 4. Stop on `Failed`, recording the step's error on the run
//!
//! Rollback is a separate, explicit call ([`Orchestrator::rollback`]).

mod executor;
mod result;
mod rollback;
mod step;

use std::future::Future;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::component::ComponentSet;
use crate::telemetry::Logger;
use crate::{Config, Result};

pub use executor::{RetryExecutor, RetryPolicy};
pub use result::{BootstrapResult, StepResult, StepStatus};
pub use rollback::{RollbackController, RollbackFailure, RollbackReport};
pub use step::{Step, StepRegistry};

/// Progress sink invoked once per completed step
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(&StepResult) + Send);

/// Drives a bootstrap run
#[derive(Debug)]
pub struct Orchestrator<'a> {
    config: &'a Config,
    registry: StepRegistry,
    executor: RetryExecutor,
    rollback: RollbackController,
    logger: Logger,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator for `config`, with the standard registry and retry policy
    pub fn new(config: &'a Config, components: ComponentSet, logger: Logger) -> Self {
        Self {
            config,
            registry: StepRegistry::from_config(config),
            executor: RetryExecutor::new(components.clone(), RetryPolicy::default()),
            rollback: RollbackController::new(components, logger.clone()),
            logger,
        }
    }

    /// Replace the step registry
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the retry executor (policy, cancellation)
    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Steps this orchestrator runs
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// `progress` is called once per completed step, in order. It only
    /// observes; it cannot affect the run.
    pub async fn run(&self, progress: Option<ProgressCallback<'_>>) -> BootstrapResult {
        self.logger
            .scope(async {
                let span = info_span!(
                    "bootstrap",
                    project = %self.config.project,
                    cluster = %self.config.cluster_name,
                    region = %self.config.region,
                    dry_run = self.config.dry_run,
                );
                self.run_steps(progress).instrument(span).await
            })
            .await
    }

    async fn run_steps(&self, mut progress: Option<ProgressCallback<'_>>) -> BootstrapResult {
        let started = Instant::now();
        let start_time = Utc::now();
        let mut steps = Vec::with_capacity(self.registry.len());
        let mut failure = None;

        info!(steps = self.registry.len(), "Starting bootstrap");

        for step in self.registry.steps() {
            let result = self.executor.execute_step(step, self.config.dry_run).await;
            let failed = result.status == StepStatus::Failed;
            if failed {
                failure = Some(result.error.clone().unwrap_or_else(|| result.message.clone()));
            }

            if let Some(callback) = progress.as_deref_mut() {
                callback(&result);
            }
            steps.push(result);

            if failed {
                break;
            }
        }

        let result = BootstrapResult {
            success: failure.is_none(),
            steps,
            start_time,
            end_time: Utc::now(),
            duration: started.elapsed(),
            error: failure,
        };

        match result.failed_step() {
            None => info!(
                duration_ms = result.duration.as_millis() as u64,
                "Bootstrap completed"
            ),
            Some(step) => error!(
                step = %step.name,
                error = %result.error.as_deref().unwrap_or_default(),
                "Bootstrap failed"
            ),
        }
        result
    }

    /// Tear down the steps `result` reports as succeeded, newest first
    pub async fn rollback(&self, result: &BootstrapResult) -> Result<RollbackReport> {
        self.rollback.rollback(result).await
    }
}

/// Cancellation token tied to Ctrl-C, for use with [`RetryExecutor::with_cancellation`].
///
/// Installing this replaces the default SIGINT exit for the rest of the
/// process, so only commands that watch the token should call it. Pair it
/// with [`interrupted_again`] so a second Ctrl-C still ends the process.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current call (Ctrl-C again to abort)");
            trigger.cancel();
        }
    });
    token
}

/// Resolves on the first Ctrl-C received after `cancel` fired
pub async fn interrupted_again(cancel: &CancellationToken) {
    after_cancellation(cancel, tokio::signal::ctrl_c).await
}

async fn after_cancellation<F, Fut>(cancel: &CancellationToken, next_signal: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    cancel.cancelled().await;
    if next_signal().await.is_err() {
        std::future::pending::<()>().await;
    }
}
