//! Cluster add-ons: ingress controller, cert-manager and external-dns
//!
//! All three are Helm releases. cert-manager additionally gets an ACME
//! ClusterIssuer once its webhook is up, and external-dns needs the DNS
//! provider token Secret in place before its pods start.

use std::sync::Arc;

use async_trait::async_trait;
use kube::discovery::ApiResource;
use serde_json::json;
use tracing::{info, warn};

use super::helm::{HelmChart, HelmRelease};
use super::{Component, ComponentId};
use crate::kube_utils::{self, ClusterConnection};
use crate::{Config, Result, CLUSTER_ISSUER_NAME, DNS_TOKEN_SECRET_KEY, DNS_TOKEN_SECRET_NAME};

/// Ingress class the ACME HTTP-01 solver routes through
pub const INGRESS_CLASS: &str = "nginx";

/// ingress-nginx controller chart
pub const INGRESS_NGINX: HelmChart = HelmChart {
    release: "ingress-nginx",
    chart: "ingress-nginx",
    repo: "https://kubernetes.github.io/ingress-nginx",
    version: "4.11.3",
    namespace: "ingress-nginx",
};

/// cert-manager chart
pub const CERT_MANAGER: HelmChart = HelmChart {
    release: "cert-manager",
    chart: "cert-manager",
    repo: "https://charts.jetstack.io",
    version: "v1.16.1",
    namespace: "cert-manager",
};

/// external-dns chart
pub const EXTERNAL_DNS: HelmChart = HelmChart {
    release: "external-dns",
    chart: "external-dns",
    repo: "https://kubernetes-sigs.github.io/external-dns/",
    version: "1.15.0",
    namespace: "external-dns",
};

const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// The ingress controller release
pub fn ingress(config: &Config, connection: Arc<ClusterConnection>) -> HelmRelease {
    HelmRelease::new(ComponentId::Ingress, INGRESS_NGINX, config, connection)
        .set("controller.ingressClassResource.name", INGRESS_CLASS)
        .set("controller.ingressClassResource.default", "true")
        .set("controller.service.type", "LoadBalancer")
}

/// cert-manager plus the `letsencrypt-prod` ClusterIssuer
#[derive(Debug)]
pub struct CertManager {
    release: HelmRelease,
    acme_email: String,
}

impl CertManager {
    /// Installer for the configured ACME account
    pub fn from_config(config: &Config, connection: Arc<ClusterConnection>) -> Self {
        let release = HelmRelease::new(ComponentId::CertManager, CERT_MANAGER, config, connection)
            .set("crds.enabled", "true");
        Self {
            release,
            acme_email: config.acme_email.clone(),
        }
    }

    /// The ACME ClusterIssuer manifest
    pub fn cluster_issuer(&self) -> serde_json::Value {
        cluster_issuer(&self.acme_email)
    }
}

fn cluster_issuer(acme_email: &str) -> serde_json::Value {
    json!({
        "apiVersion": "cert-manager.io/v1",
        "kind": "ClusterIssuer",
        "metadata": { "name": CLUSTER_ISSUER_NAME },
        "spec": {
            "acme": {
                "server": LETSENCRYPT_PRODUCTION,
                "email": acme_email,
                "privateKeySecretRef": { "name": format!("{}-account-key", CLUSTER_ISSUER_NAME) },
                "solvers": [
                    { "http01": { "ingress": { "ingressClassName": INGRESS_CLASS } } }
                ]
            }
        }
    })
}

#[async_trait]
impl Component for CertManager {
    async fn install(&self) -> Result<()> {
        self.release.install().await?;

        info!(issuer = CLUSTER_ISSUER_NAME, "Applying ACME ClusterIssuer");
        let client = self.release.connection().client().await?;
        kube_utils::apply_json(
            &client,
            &kube_utils::cluster_issuer_api_resource(),
            None,
            &self.cluster_issuer(),
        )
        .await
    }

    async fn uninstall(&self) -> Result<()> {
        // The issuer CRD goes away with the chart; delete the object first so
        // its finalizers run while the controller is still there.
        match self.release.connection().client().await {
            Ok(client) => {
                let ar = kube_utils::cluster_issuer_api_resource();
                match kube_utils::delete_if_exists(&client, &ar, None, CLUSTER_ISSUER_NAME).await {
                    Ok(true) => info!(issuer = CLUSTER_ISSUER_NAME, "Deleted ClusterIssuer"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Failed to delete ClusterIssuer"),
                }
            }
            Err(e) => warn!(error = %e, "Cluster unreachable, skipping ClusterIssuer cleanup"),
        }
        self.release.uninstall().await
    }

    async fn health_check(&self) -> Result<()> {
        self.release.health_check().await
    }
}

/// external-dns with the DNS provider token Secret
#[derive(Debug)]
pub struct ExternalDns {
    release: HelmRelease,
    dns_token: String,
}

impl ExternalDns {
    /// Installer restricted to the configured domain
    pub fn from_config(config: &Config, connection: Arc<ClusterConnection>) -> Self {
        let release = HelmRelease::new(ComponentId::ExternalDns, EXTERNAL_DNS, config, connection)
            .set("provider.name", "cloudflare")
            .set("env[0].name", "CF_API_TOKEN")
            .set("env[0].valueFrom.secretKeyRef.name", DNS_TOKEN_SECRET_NAME)
            .set("env[0].valueFrom.secretKeyRef.key", DNS_TOKEN_SECRET_KEY)
            .set("domainFilters[0]", config.domain.clone())
            .set("txtOwnerId", config.cluster_name.clone())
            .set("policy", "sync");
        Self {
            release,
            dns_token: config.dns_token.clone(),
        }
    }

    /// Objects that must exist before the chart, in apply order
    fn prerequisites(&self) -> [Prerequisite; 2] {
        [
            Prerequisite {
                api_resource: kube_utils::namespace_api_resource(),
                namespace: None,
                object: json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": EXTERNAL_DNS.namespace }
                }),
            },
            Prerequisite {
                api_resource: kube_utils::secret_api_resource(),
                namespace: Some(EXTERNAL_DNS.namespace),
                object: token_secret(&self.dns_token),
            },
        ]
    }
}

/// A plain object applied alongside a chart
struct Prerequisite {
    api_resource: ApiResource,
    namespace: Option<&'static str>,
    object: serde_json::Value,
}

impl Prerequisite {
    fn name(&self) -> &str {
        self.object["metadata"]["name"].as_str().unwrap_or_default()
    }
}

fn token_secret(token: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": DNS_TOKEN_SECRET_NAME,
            "namespace": EXTERNAL_DNS.namespace,
        },
        "type": "Opaque",
        "stringData": { DNS_TOKEN_SECRET_KEY: token }
    })
}

#[async_trait]
impl Component for ExternalDns {
    async fn install(&self) -> Result<()> {
        let client = self.release.connection().client().await?;

        for prerequisite in self.prerequisites() {
            info!(
                kind = %prerequisite.api_resource.kind,
                name = prerequisite.name(),
                "Applying external-dns prerequisite"
            );
            kube_utils::apply_json(
                &client,
                &prerequisite.api_resource,
                prerequisite.namespace,
                &prerequisite.object,
            )
            .await?;
        }

        self.release.install().await
    }

    async fn uninstall(&self) -> Result<()> {
        self.release.uninstall().await?;

        let client = self.release.connection().client().await?;
        for prerequisite in self.prerequisites().iter().rev() {
            let deleted = kube_utils::delete_if_exists(
                &client,
                &prerequisite.api_resource,
                prerequisite.namespace,
                prerequisite.name(),
            )
            .await?;
            if deleted {
                info!(
                    kind = %prerequisite.api_resource.kind,
                    name = prerequisite.name(),
                    "Deleted external-dns prerequisite"
                );
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.release.health_check().await
    }
}
