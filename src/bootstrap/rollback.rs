//! Best-effort teardown of a failed run
//!
//! Only steps that reported `Success` are torn down, newest first. A teardown
//! failure is logged and recorded, and the remaining steps are still torn
//! down; rollback itself never fails.

use serde::Serialize;
use tracing::{error, info};

use super::result::{BootstrapResult, StepStatus};
use crate::component::{ComponentId, ComponentSet};
use crate::telemetry::Logger;
use crate::Result;

/// What a rollback did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Steps torn down successfully, in teardown order
    pub torn_down: Vec<String>,
    /// Steps whose teardown failed, in teardown order
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    /// Whether every teardown succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A teardown that failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RollbackFailure {
    /// Step name
    pub step: String,
    /// Component whose teardown failed
    pub component: ComponentId,
    /// Rendered error
    pub error: String,
}

/// Tears down succeeded steps in reverse order
#[derive(Clone, Debug)]
pub struct RollbackController {
    components: ComponentSet,
    logger: Logger,
}

impl RollbackController {
    /// Controller dispatching teardown through `components`
    pub fn new(components: ComponentSet, logger: Logger) -> Self {
        Self { components, logger }
    }

    /// Tear down every `Success` step of `result`, last first.
    ///
    /// Always returns `Ok`; per-step failures are in the report and the log.
    pub async fn rollback(&self, result: &BootstrapResult) -> Result<RollbackReport> {
        self.logger.scope(self.teardown(result)).await
    }

    async fn teardown(&self, result: &BootstrapResult) -> Result<RollbackReport> {
        let mut report = RollbackReport::default();
        let candidates = result.count(StepStatus::Success);
        info!(steps = candidates, "Rolling back succeeded steps");

        for step in result.succeeded().rev() {
            info!(
                step = %step.name,
                component = %step.component,
                action = step.component.teardown_verb(),
                "Tearing down"
            );
            match self.components.get(step.component).uninstall().await {
                Ok(()) => {
                    info!(step = %step.name, "Teardown complete");
                    report.torn_down.push(step.name.clone());
                }
                Err(e) => {
                    error!(step = %step.name, error = %e, "Teardown failed, continuing rollback");
                    report.failures.push(RollbackFailure {
                        step: step.name.clone(),
                        component: step.component,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            torn_down = report.torn_down.len(),
            failed = report.failures.len(),
            "Rollback finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use mockall::Sequence;

    use crate::bootstrap::StepResult;
    use crate::component::{Component, MockComponent};
    use crate::Error;

    fn step(name: &str, component: ComponentId, status: StepStatus) -> StepResult {
        let now = Utc::now();
        StepResult {
            name: name.to_string(),
            component,
            status,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            retries: 0,
            error: None,
            message: String::new(),
        }
    }

    fn run_result(steps: Vec<StepResult>) -> BootstrapResult {
        let now = Utc::now();
        BootstrapResult {
            success: false,
            steps,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            error: None,
        }
    }

    fn untouched() -> Arc<dyn Component> {
        let mut mock = MockComponent::new();
        mock.expect_uninstall().times(0);
        Arc::new(mock)
    }

    /// Scenario: steps 1 and 3 succeeded, step 2 failed. Teardown runs for 3
    /// then 1; 2 is never touched.
    #[tokio::test]
    async fn tears_down_successes_in_reverse_order() {
        let mut seq = Sequence::new();
        let mut infra = MockComponent::new();
        let mut ingress = MockComponent::new();
        let mut cert_manager = MockComponent::new();

        cert_manager
            .expect_uninstall()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        infra
            .expect_uninstall()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        ingress.expect_uninstall().times(0);

        let components = ComponentSet {
            infrastructure: Arc::new(infra),
            ingress: Arc::new(ingress),
            cert_manager: Arc::new(cert_manager),
            external_dns: untouched(),
            validation: untouched(),
        };

        let result = run_result(vec![
            step("provision-infrastructure", ComponentId::Infrastructure, StepStatus::Success),
            step("install-ingress", ComponentId::Ingress, StepStatus::Failed),
            step("install-cert-manager", ComponentId::CertManager, StepStatus::Success),
        ]);

        let report = RollbackController::new(components, Logger::disabled())
            .rollback(&result)
            .await
            .unwrap();

        assert_eq!(
            report.torn_down,
            vec!["install-cert-manager", "provision-infrastructure"]
        );
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn teardown_failure_does_not_stop_rollback() {
        let mut seq = Sequence::new();
        let mut infra = MockComponent::new();
        let mut ingress = MockComponent::new();

        ingress
            .expect_uninstall()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(Error::command("helm uninstall", "connection refused")));
        infra
            .expect_uninstall()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let components = ComponentSet {
            infrastructure: Arc::new(infra),
            ingress: Arc::new(ingress),
            cert_manager: untouched(),
            external_dns: untouched(),
            validation: untouched(),
        };

        let result = run_result(vec![
            step("provision-infrastructure", ComponentId::Infrastructure, StepStatus::Success),
            step("install-ingress", ComponentId::Ingress, StepStatus::Success),
            step("install-cert-manager", ComponentId::CertManager, StepStatus::Failed),
        ]);

        let report = RollbackController::new(components, Logger::disabled())
            .rollback(&result)
            .await
            .expect("rollback is best-effort and never fails");

        assert_eq!(report.torn_down, vec!["provision-infrastructure"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].component, ComponentId::Ingress);
        assert!(report.failures[0].error.contains("connection refused"));
    }

    #[tokio::test]
    async fn skipped_and_failed_steps_are_never_torn_down() {
        let components = ComponentSet {
            infrastructure: untouched(),
            ingress: untouched(),
            cert_manager: untouched(),
            external_dns: untouched(),
            validation: untouched(),
        };
        let result = run_result(vec![
            step("provision-infrastructure", ComponentId::Infrastructure, StepStatus::Skipped),
            step("install-ingress", ComponentId::Ingress, StepStatus::Failed),
        ]);

        let report = RollbackController::new(components, Logger::disabled())
            .rollback(&result)
            .await
            .unwrap();
        assert!(report.torn_down.is_empty());
        assert!(report.is_clean());
    }
}
