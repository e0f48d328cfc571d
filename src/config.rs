//! Immutable run configuration
//!
//! A [`Config`] is built once at process start (from CLI flags and their
//! environment fallbacks) and then only ever shared by reference.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::component::ComponentId;
use crate::{Error, Result, DEFAULT_COMMAND_TIMEOUT};

/// Per-component skip flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipFlags {
    /// Skip Terraform infrastructure provisioning
    pub infrastructure: bool,
    /// Skip the ingress controller
    pub ingress: bool,
    /// Skip cert-manager and the ACME issuer
    pub cert_manager: bool,
    /// Skip external-dns
    pub external_dns: bool,
    /// Skip the final validation step
    pub validation: bool,
}

impl SkipFlags {
    /// Whether the given component is skipped
    pub fn is_skipped(&self, component: ComponentId) -> bool {
        match component {
            ComponentId::Infrastructure => self.infrastructure,
            ComponentId::Ingress => self.ingress,
            ComponentId::CertManager => self.cert_manager,
            ComponentId::ExternalDns => self.external_dns,
            ComponentId::Validation => self.validation,
        }
    }

    /// Whether every Helm-installed add-on is skipped
    pub fn all_addons_skipped(&self) -> bool {
        self.ingress && self.cert_manager && self.external_dns
    }
}

/// Run parameters for a bootstrap or diagnostics run
#[derive(Clone)]
pub struct Config {
    /// Cloud project / account identifier
    pub project: String,
    /// Cloud region
    pub region: String,
    /// Kubernetes cluster name
    pub cluster_name: String,
    /// Public domain managed by external-dns and covered by TLS certificates
    pub domain: String,
    /// Contact e-mail for the ACME account
    pub acme_email: String,
    /// DNS provider API token (never logged)
    pub dns_token: String,
    /// Per-component skip flags
    pub skip: SkipFlags,
    /// Kubeconfig path (kube defaults when `None`)
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context (current context when `None`)
    pub context: Option<String>,
    /// Directory holding the Terraform configuration
    pub terraform_dir: PathBuf,
    /// Simulate every step without side effects
    pub dry_run: bool,
    /// Deadline applied to each external command
    pub command_timeout: Duration,
}

impl Config {
    /// Create a config with the required identity fields and defaults elsewhere
    pub fn new(
        project: impl Into<String>,
        region: impl Into<String>,
        cluster_name: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            cluster_name: cluster_name.into(),
            domain: domain.into(),
            acme_email: String::new(),
            dns_token: String::new(),
            skip: SkipFlags::default(),
            kubeconfig: None,
            context: None,
            terraform_dir: PathBuf::from("infra"),
            dry_run: false,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Check the target identity and domain.
    ///
    /// This is all a read-only diagnostics run needs.
    pub fn validate_target(&self) -> Result<()> {
        for (field, value) in [
            ("project", &self.project),
            ("region", &self.region),
            ("cluster name", &self.cluster_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{} must not be empty", field)));
            }
        }

        validate_domain(&self.domain)
    }

    /// Check the configuration is usable for the enabled components
    pub fn validate(&self) -> Result<()> {
        self.validate_target()?;

        if !self.skip.external_dns && self.dns_token.trim().is_empty() {
            return Err(Error::config(
                "DNS provider token is required unless external-dns is skipped",
            ));
        }

        if !self.skip.cert_manager && !self.acme_email.contains('@') {
            return Err(Error::config(format!(
                "a valid ACME e-mail is required unless cert-manager is skipped (got '{}')",
                self.acme_email
            )));
        }

        if self.command_timeout.is_zero() {
            return Err(Error::config("command timeout must be greater than zero"));
        }

        Ok(())
    }

    /// Whether a component is enabled for this run
    pub fn is_enabled(&self, component: ComponentId) -> bool {
        !self.skip.is_skipped(component)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("project", &self.project)
            .field("region", &self.region)
            .field("cluster_name", &self.cluster_name)
            .field("domain", &self.domain)
            .field("acme_email", &self.acme_email)
            .field("dns_token", &"<redacted>")
            .field("skip", &self.skip)
            .field("kubeconfig", &self.kubeconfig)
            .field("context", &self.context)
            .field("terraform_dir", &self.terraform_dir)
            .field("dry_run", &self.dry_run)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

fn validate_domain(domain: &str) -> Result<()> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(Error::config(format!(
            "domain '{}' must have at least two labels",
            domain
        )));
    }

    let valid_label = |label: &&str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    };

    if !labels.iter().all(valid_label) {
        return Err(Error::config(format!("domain '{}' is not a valid DNS name", domain)));
    }

    Ok(())
}
