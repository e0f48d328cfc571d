//! End-to-end bootstrap flows through the public API
//!
//! Components and the cluster are replaced by in-memory fakes that record
//! every call, so these tests exercise the orchestrator, the validation step
//! and rollback together without touching a real cluster or binary.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use launchpad::bootstrap::{Orchestrator, StepStatus};
use launchpad::component::{Component, ComponentId, ComponentSet};
use launchpad::telemetry::Logger;
use launchpad::validate::{ClusterInspector, ValidationStep, Validator};
use launchpad::{Config, Error, Result};

type CallLog = Arc<Mutex<Vec<String>>>;

/// Component that always succeeds and records what was called
struct Recording {
    id: ComponentId,
    calls: CallLog,
}

impl Recording {
    fn new(id: ComponentId, calls: &CallLog) -> Arc<dyn Component> {
        Arc::new(Self {
            id,
            calls: calls.clone(),
        })
    }

    fn log(&self, op: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", op, self.id));
    }
}

#[async_trait]
impl Component for Recording {
    async fn install(&self) -> Result<()> {
        self.log("install");
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        self.log("uninstall");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.log("health");
        Ok(())
    }
}

/// Cluster where every add-on is present except the listed namespaces
struct FakeCluster {
    missing_namespaces: Vec<&'static str>,
}

#[async_trait]
impl ClusterInspector for FakeCluster {
    async fn server_version(&self) -> Result<String> {
        Ok("v1.32.1".to_string())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(!self.missing_namespaces.contains(&namespace))
    }

    async fn running_pods(&self, _namespace: &str, _selector: &str) -> Result<usize> {
        Ok(3)
    }

    async fn service_exists(&self, _namespace: &str, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn secret_exists(&self, _namespace: &str, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn node_readiness(&self) -> Result<(usize, usize)> {
        Ok((2, 2))
    }

    async fn load_balancer_address(
        &self,
        _namespace: &str,
        _service: &str,
    ) -> Result<Option<String>> {
        Ok(Some("203.0.113.7".to_string()))
    }

    async fn cluster_issuer_ready(&self, _name: &str) -> Result<Option<bool>> {
        Ok(Some(true))
    }

    async fn resolve_host(&self, _host: &str) -> Result<Vec<IpAddr>> {
        Err(Error::not_ready("dns", "NXDOMAIN"))
    }
}

fn config() -> Config {
    let mut config = Config::new("acme", "us-east-1", "platform", "example.com");
    config.acme_email = "ops@example.com".to_string();
    config.dns_token = "token".to_string();
    config
}

fn components(config: &Config, cluster: FakeCluster, calls: &CallLog) -> ComponentSet {
    let validator = Validator::new(config, Arc::new(cluster), Logger::disabled());
    ComponentSet {
        infrastructure: Recording::new(ComponentId::Infrastructure, calls),
        ingress: Recording::new(ComponentId::Ingress, calls),
        cert_manager: Recording::new(ComponentId::CertManager, calls),
        external_dns: Recording::new(ComponentId::ExternalDns, calls),
        validation: Arc::new(ValidationStep::new(Arc::new(validator))),
    }
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn healthy_platform_bootstraps_in_order() {
    let config = config();
    let log = CallLog::default();
    let cluster = FakeCluster {
        missing_namespaces: vec![],
    };

    let components = components(&config, cluster, &log);
    let orchestrator = Orchestrator::new(&config, components, Logger::disabled());
    let result = orchestrator.run(None).await;

    assert!(result.success);
    assert_eq!(result.count(StepStatus::Success), 5);
    assert_eq!(
        calls(&log),
        vec![
            "install infrastructure",
            "health infrastructure",
            "install ingress",
            "health ingress",
            "install cert-manager",
            "health cert-manager",
            "install external-dns",
            "health external-dns",
        ]
    );
}

/// Validation finds cert-manager missing, the run fails on the last step and
/// rollback removes the four installed components newest first.
#[tokio::test(start_paused = true)]
async fn failed_validation_rolls_back_everything_installed() {
    let config = config();
    let log = CallLog::default();
    let cluster = FakeCluster {
        missing_namespaces: vec!["cert-manager"],
    };

    let components = components(&config, cluster, &log);
    let orchestrator = Orchestrator::new(&config, components, Logger::disabled());
    let result = orchestrator.run(None).await;

    assert!(!result.success);
    let failed = result.failed_step().unwrap();
    assert_eq!(failed.name, "validate-deployment");
    assert_eq!(failed.retries, 2);
    let error = result.error.as_deref().unwrap();
    assert!(error.starts_with("validation failed: 1 of 9 checks failed"));
    assert!(error.contains("Namespace cert-manager"));

    log.lock().unwrap().clear();
    let report = orchestrator.rollback(&result).await.unwrap();

    assert!(report.is_clean());
    assert_eq!(
        calls(&log),
        vec![
            "uninstall external-dns",
            "uninstall cert-manager",
            "uninstall ingress",
            "uninstall infrastructure",
        ]
    );
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let mut config = config();
    config.dry_run = true;
    let log = CallLog::default();
    let cluster = FakeCluster {
        missing_namespaces: vec!["ingress-nginx", "cert-manager", "external-dns"],
    };

    let components = components(&config, cluster, &log);
    let result = Orchestrator::new(&config, components, Logger::disabled())
        .run(None)
        .await;

    assert!(result.success);
    assert!(result.steps.iter().all(|s| s.message == "Dry-run simulation"));
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn diagnostics_report_every_failure_without_stopping() {
    let config = config();
    let cluster = FakeCluster {
        missing_namespaces: vec!["ingress-nginx"],
    };
    let validator = Validator::new(&config, Arc::new(cluster), Logger::disabled());

    let result = validator.run_diagnostics(None).await;

    let failed: Vec<&str> = result.failed().map(|c| c.name.as_str()).collect();
    assert_eq!(failed, vec!["Namespace ingress-nginx", "DNS resolves example.com"]);
    assert_eq!(result.failed_count, 2);
    assert!(!result.all_passed);
    assert!(result
        .failed()
        .all(|c| c.remediation.as_deref().is_some_and(|r| !r.is_empty())));
}
