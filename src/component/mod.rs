//! Installable components
//!
//! Every unit the bootstrap can install implements [`Component`]. The set of
//! components is closed ([`ComponentId`]), and [`ComponentSet`] resolves an id
//! to its implementation with an exhaustive match, so a new component cannot
//! be added without wiring its install and teardown.

mod addons;
mod helm;
mod infrastructure;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::kube_utils::ClusterConnection;
use crate::validate::{ValidationStep, Validator};
use crate::{Config, Error};

pub use addons::{
    ingress, CertManager, ExternalDns, CERT_MANAGER, EXTERNAL_DNS, INGRESS_CLASS, INGRESS_NGINX,
};
pub use helm::{HelmChart, HelmRelease};
pub use infrastructure::Terraform;

/// Identifier of an installable component
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentId {
    /// Cloud infrastructure (network, cluster, IAM) via Terraform
    Infrastructure,
    /// Ingress controller
    Ingress,
    /// cert-manager with an ACME ClusterIssuer
    CertManager,
    /// external-dns managing records for the domain
    ExternalDns,
    /// Post-install validation battery
    Validation,
}

impl ComponentId {
    /// All components in registry order
    pub const ALL: [ComponentId; 5] = [
        ComponentId::Infrastructure,
        ComponentId::Ingress,
        ComponentId::CertManager,
        ComponentId::ExternalDns,
        ComponentId::Validation,
    ];

    /// Stable kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentId::Infrastructure => "infrastructure",
            ComponentId::Ingress => "ingress",
            ComponentId::CertManager => "cert-manager",
            ComponentId::ExternalDns => "external-dns",
            ComponentId::Validation => "validation",
        }
    }

    /// Verb used when tearing this component down
    pub fn teardown_verb(&self) -> &'static str {
        match self {
            ComponentId::Infrastructure => "destroy",
            _ => "uninstall",
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        ComponentId::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = ComponentId::ALL.iter().map(|c| c.as_str()).collect();
                format!(
                    "unknown component '{}', expected one of: {}",
                    s,
                    names.join(", ")
                )
            })
    }
}

/// Capability contract implemented by every installer
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Component: Send + Sync {
    /// Install or upgrade the component. Idempotent where possible.
    async fn install(&self) -> Result<(), Error>;

    /// Best-effort teardown
    async fn uninstall(&self) -> Result<(), Error>;

    /// Read-only readiness probe
    async fn health_check(&self) -> Result<(), Error>;
}

/// One implementation per [`ComponentId`]
#[derive(Clone)]
pub struct ComponentSet {
    /// Infrastructure provisioner
    pub infrastructure: Arc<dyn Component>,
    /// Ingress controller installer
    pub ingress: Arc<dyn Component>,
    /// cert-manager installer
    pub cert_manager: Arc<dyn Component>,
    /// external-dns installer
    pub external_dns: Arc<dyn Component>,
    /// Validation step
    pub validation: Arc<dyn Component>,
}

impl ComponentSet {
    /// Build the production components for a run, sharing one cluster
    /// connection between them
    pub fn from_config(
        config: &Config,
        connection: Arc<ClusterConnection>,
        validator: Arc<Validator>,
    ) -> Self {
        Self {
            infrastructure: Arc::new(Terraform::from_config(config, connection.clone())),
            ingress: Arc::new(ingress(config, connection.clone())),
            cert_manager: Arc::new(CertManager::from_config(config, connection.clone())),
            external_dns: Arc::new(ExternalDns::from_config(config, connection)),
            validation: Arc::new(ValidationStep::new(validator)),
        }
    }

    /// Resolve a component id to its implementation
    pub fn get(&self, id: ComponentId) -> &dyn Component {
        match id {
            ComponentId::Infrastructure => self.infrastructure.as_ref(),
            ComponentId::Ingress => self.ingress.as_ref(),
            ComponentId::CertManager => self.cert_manager.as_ref(),
            ComponentId::ExternalDns => self.external_dns.as_ref(),
            ComponentId::Validation => self.validation.as_ref(),
        }
    }
}

impl fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSet").finish_non_exhaustive()
    }
}
