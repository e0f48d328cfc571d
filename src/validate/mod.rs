//! Validation and diagnostics
//!
//! The [`Validator`] runs a battery of read-only checks against the cluster.
//! Unlike the bootstrap it never stops at the first failure: every check runs
//! and reports pass or fail with remediation text. The one exception is
//! connectivity: if the API server cannot be reached, nothing else can be
//! checked and the result holds that single failing check.
//!
//! For each enabled add-on the namespace is checked first. A missing
//! namespace is reported once and the rest of that add-on's checks are not
//! evaluated; the engine moves on to the next component.
//!
//! [`Validator::run`] is the battery used as the final bootstrap step;
//! [`Validator::run_diagnostics`] adds deeper checks (load balancer address,
//! ACME issuer readiness, DNS resolution) and can be narrowed to one
//! component.

mod checks;
mod inspector;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::component::{Component, ComponentId};
use crate::config::SkipFlags;
use crate::telemetry::Logger;
use crate::{Config, Error, Result};

pub use checks::{expectation, Expectation, PodExpectation, EXPECTATIONS};
#[cfg(test)]
pub use inspector::MockClusterInspector;
pub use inspector::{ClusterInspector, KubeInspector};

/// Grouping of checks in reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckCategory {
    /// API server reachability
    Connectivity,
    /// Nodes
    Cluster,
    /// Ingress controller
    Ingress,
    /// cert-manager
    CertManager,
    /// external-dns
    ExternalDns,
    /// Certificate issuance
    Tls,
    /// Public DNS
    Dns,
}

impl From<ComponentId> for CheckCategory {
    fn from(component: ComponentId) -> Self {
        match component {
            ComponentId::Infrastructure | ComponentId::Validation => CheckCategory::Cluster,
            ComponentId::Ingress => CheckCategory::Ingress,
            ComponentId::CertManager => CheckCategory::CertManager,
            ComponentId::ExternalDns => CheckCategory::ExternalDns,
        }
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckCategory::Connectivity => "Connectivity",
            CheckCategory::Cluster => "Cluster",
            CheckCategory::Ingress => "Ingress",
            CheckCategory::CertManager => "cert-manager",
            CheckCategory::ExternalDns => "external-dns",
            CheckCategory::Tls => "TLS",
            CheckCategory::Dns => "DNS",
        };
        f.write_str(s)
    }
}

/// Outcome of one read-only check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCheck {
    /// What was checked
    pub name: String,
    /// Report group
    pub category: CheckCategory,
    /// Whether the check passed
    pub passed: bool,
    /// Human-readable outcome
    pub message: String,
    /// Underlying error, when the check could not be evaluated
    pub error: Option<String>,
    /// What to do about a failure
    pub remediation: Option<String>,
}

/// A check produced by [`Validator::run`]
pub type ValidationCheck = DiagnosticCheck;

impl DiagnosticCheck {
    /// A passing check
    pub fn pass(
        name: impl Into<String>,
        category: CheckCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            passed: true,
            message: message.into(),
            error: None,
            remediation: None,
        }
    }

    /// A failing check with remediation text
    pub fn fail(
        name: impl Into<String>,
        category: CheckCategory,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            passed: false,
            message: message.into(),
            error: None,
            remediation: Some(remediation.into()),
        }
    }

    /// Attach the error that made the check fail
    pub fn with_error(mut self, error: Error) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// All checks of one validation or diagnostics pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    /// Checks in evaluation order
    pub checks: Vec<DiagnosticCheck>,
    /// Number of failing checks
    pub failed_count: usize,
    /// True iff no check failed
    pub all_passed: bool,
}

/// Result of [`Validator::run`]
pub type ValidationResult = DiagnosticResult;

impl DiagnosticResult {
    /// Aggregate a list of checks
    pub fn from_checks(checks: Vec<DiagnosticCheck>) -> Self {
        let failed_count = checks.iter().filter(|c| !c.passed).count();
        Self {
            checks,
            failed_count,
            all_passed: failed_count == 0,
        }
    }

    /// Failing checks
    pub fn failed(&self) -> impl Iterator<Item = &DiagnosticCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Checks grouped by category, each group in evaluation order
    pub fn by_category(&self) -> BTreeMap<CheckCategory, Vec<&DiagnosticCheck>> {
        let mut groups: BTreeMap<CheckCategory, Vec<&DiagnosticCheck>> = BTreeMap::new();
        for check in &self.checks {
            groups.entry(check.category).or_default().push(check);
        }
        groups
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Depth {
    Validation,
    Diagnostics,
}

/// Read-only checker for a deployed platform
pub struct Validator {
    inspector: Arc<dyn ClusterInspector>,
    skip: SkipFlags,
    domain: String,
    logger: Logger,
}

impl Validator {
    /// Validator for the components `config` enables
    pub fn new(config: &Config, inspector: Arc<dyn ClusterInspector>, logger: Logger) -> Self {
        Self {
            inspector,
            skip: config.skip,
            domain: config.domain.clone(),
            logger,
        }
    }

    /// Run the validation battery
    pub async fn run(&self) -> ValidationResult {
        self.logger
            .scope(async {
                let span = info_span!("validate");
                self.evaluate(Depth::Validation, None).instrument(span).await
            })
            .await
    }

    /// Run the validation battery plus deeper diagnostics, optionally for
    /// one component only.
    ///
    /// `Infrastructure` narrows to the node check. `Validation` owns no checks
    /// of its own and selects the whole battery, the same as `None`.
    pub async fn run_diagnostics(&self, filter: Option<ComponentId>) -> DiagnosticResult {
        let filter = filter.filter(|c| *c != ComponentId::Validation);
        self.logger
            .scope(async {
                let span = info_span!("diagnose", component = ?filter);
                self.evaluate(Depth::Diagnostics, filter)
                    .instrument(span)
                    .await
            })
            .await
    }

    fn selected(&self, component: ComponentId, filter: Option<ComponentId>) -> bool {
        !self.skip.is_skipped(component) && filter.map_or(true, |f| f == component)
    }

    async fn evaluate(&self, depth: Depth, filter: Option<ComponentId>) -> DiagnosticResult {
        let inspector = self.inspector.as_ref();
        let mut checks = Vec::new();

        let connected = record(&mut checks, checks::connectivity(inspector).await);
        if !connected {
            warn!("Cluster unreachable, skipping remaining checks");
            return DiagnosticResult::from_checks(checks);
        }

        if self.selected(ComponentId::Infrastructure, filter) {
            record(&mut checks, checks::nodes_ready(inspector).await);
        }

        for expected in EXPECTATIONS.iter() {
            if !self.selected(expected.component, filter) {
                debug!(component = %expected.component, "Not checked");
                continue;
            }

            if !record(&mut checks, checks::namespace(inspector, expected).await) {
                continue;
            }
            record(&mut checks, checks::pods(inspector, expected).await);
            for service in expected.services {
                record(&mut checks, checks::service(inspector, expected, service).await);
            }
            for secret in expected.secrets {
                record(&mut checks, checks::secret(inspector, expected, secret).await);
            }

            if depth == Depth::Diagnostics {
                match expected.component {
                    ComponentId::Ingress => {
                        record(&mut checks, checks::load_balancer(inspector).await);
                    }
                    ComponentId::CertManager => {
                        record(&mut checks, checks::cluster_issuer(inspector).await);
                    }
                    ComponentId::ExternalDns => {
                        record(&mut checks, checks::dns_resolves(inspector, &self.domain).await);
                    }
                    _ => {}
                }
            }
        }

        let result = DiagnosticResult::from_checks(checks);
        info!(
            total = result.checks.len(),
            failed = result.failed_count,
            "Checks complete"
        );
        result
    }
}

/// Log and keep a check, returning whether it passed
fn record(checks: &mut Vec<DiagnosticCheck>, check: DiagnosticCheck) -> bool {
    if check.passed {
        debug!(check = %check.name, message = %check.message, "Check passed");
    } else {
        warn!(
            check = %check.name,
            message = %check.message,
            error = check.error.as_deref().unwrap_or(""),
            "Check failed"
        );
    }
    let passed = check.passed;
    checks.push(check);
    passed
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("skip", &self.skip)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// The validator as the final bootstrap step
#[derive(Debug, Clone)]
pub struct ValidationStep {
    validator: Arc<Validator>,
}

impl ValidationStep {
    /// Wrap a validator
    pub fn new(validator: Arc<Validator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Component for ValidationStep {
    async fn install(&self) -> Result<()> {
        let result = self.validator.run().await;
        if result.all_passed {
            return Ok(());
        }
        let names: Vec<&str> = result.failed().map(|c| c.name.as_str()).collect();
        Err(Error::Validation {
            failed: result.failed_count,
            total: result.checks.len(),
            checks: names.join(", "),
        })
    }

    async fn uninstall(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
