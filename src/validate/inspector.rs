//! Read-only cluster queries used by the validator

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::api::{Api, DynamicObject, ListParams};
#[cfg(test)]
use mockall::automock;

use crate::kube_utils::{self, ClusterConnection};
use crate::Result;

/// The questions the validator asks of the cluster and the outside world.
///
/// Every method is read-only.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterInspector: Send + Sync {
    /// API server version string; any error means no connectivity
    async fn server_version(&self) -> Result<String>;

    /// Whether the namespace exists
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// Number of `Running` pods matching a label selector
    async fn running_pods(&self, namespace: &str, selector: &str) -> Result<usize>;

    /// Whether the service exists
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Whether the secret exists
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// `(ready, total)` node counts
    async fn node_readiness(&self) -> Result<(usize, usize)>;

    /// External address assigned to a LoadBalancer service, if any
    async fn load_balancer_address(&self, namespace: &str, service: &str)
        -> Result<Option<String>>;

    /// Ready condition of a ClusterIssuer; `None` when it does not exist
    async fn cluster_issuer_ready(&self, name: &str) -> Result<Option<bool>>;

    /// Addresses a host name resolves to
    async fn resolve_host(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// [`ClusterInspector`] backed by the Kubernetes API and the system resolver
#[derive(Debug)]
pub struct KubeInspector {
    connection: Arc<ClusterConnection>,
}

impl KubeInspector {
    /// Inspector over a (lazily connected) cluster
    pub fn new(connection: Arc<ClusterConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ClusterInspector for KubeInspector {
    async fn server_version(&self) -> Result<String> {
        let client = self.connection.client().await?;
        let info = client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let client = self.connection.client().await?;
        let api: Api<Namespace> = Api::all(client);
        Ok(api.get_opt(namespace).await?.is_some())
    }

    async fn running_pods(&self, namespace: &str, selector: &str) -> Result<usize> {
        let client = self.connection.client().await?;
        let api: Api<Pod> = Api::namespaced(client, namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods
            .items
            .iter()
            .filter(|p| {
                p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
            })
            .count())
    }

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let client = self.connection.client().await?;
        let api: Api<Service> = Api::namespaced(client, namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let client = self.connection.client().await?;
        let api: Api<Secret> = Api::namespaced(client, namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn node_readiness(&self) -> Result<(usize, usize)> {
        let client = self.connection.client().await?;
        kube_utils::node_readiness(&client).await
    }

    async fn load_balancer_address(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>> {
        let client = self.connection.client().await?;
        let api: Api<Service> = Api::namespaced(client, namespace);
        let Some(svc) = api.get_opt(service).await? else {
            return Ok(None);
        };
        let address = svc
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .and_then(|ingress| ingress.into_iter().next())
            .and_then(|entry| entry.ip.or(entry.hostname));
        Ok(address)
    }

    async fn cluster_issuer_ready(&self, name: &str) -> Result<Option<bool>> {
        let client = self.connection.client().await?;
        let ar = kube_utils::cluster_issuer_api_resource();
        let api: Api<DynamicObject> = Api::all_with(client, &ar);
        match api.get_opt(name).await {
            Ok(issuer) => Ok(issuer.map(|i| kube_utils::dynamic_ready_condition(&i))),
            // CRD not installed
            Err(e) if kube_utils::is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_host(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 443)).await?;
        Ok(unique_ips(addrs))
    }
}

/// Distinct addresses, sorted; resolvers interleave A and AAAA answers
fn unique_ips(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<IpAddr> {
    addrs
        .into_iter()
        .map(|a| a.ip())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_addresses_are_dropped_across_families() {
        let addrs: Vec<SocketAddr> = [
            "203.0.113.7:443",
            "[2001:db8::7]:443",
            "203.0.113.7:443",
            "198.51.100.1:443",
            "[2001:db8::7]:443",
        ]
        .iter()
        .map(|a| a.parse().unwrap())
        .collect();

        let ips: Vec<String> = unique_ips(addrs).iter().map(ToString::to_string).collect();
        assert_eq!(ips, vec!["198.51.100.1", "203.0.113.7", "2001:db8::7"]);
    }
}
