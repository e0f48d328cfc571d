//! Shared Kubernetes utilities using kube-rs
//!
//! Read-only probes used by health checks and the validator, plus the two
//! server-side applies the add-on installers need.

use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "launchpad";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const STATUS_TRUE: &str = "True";
const CONDITION_READY: &str = "Ready";
const CONDITION_AVAILABLE: &str = "Available";

/// Lazily-connected handle to the target cluster.
///
/// The client is created on first use so that the infrastructure step can
/// create the cluster (and its kubeconfig) before anything connects. A failed
/// connection attempt is not cached; the next call tries again.
pub struct ClusterConnection {
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    client: OnceCell<Client>,
}

impl ClusterConnection {
    /// Create a connection handle for the given kubeconfig path and context
    pub fn new(kubeconfig: Option<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig,
            context,
            client: OnceCell::new(),
        }
    }

    /// Connection handle for a run configuration
    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(config.kubeconfig.clone(), config.context.clone())
    }

    /// Get (creating if needed) the kube client
    pub async fn client(&self) -> Result<Client> {
        self.client
            .get_or_try_init(|| create_client(self.kubeconfig.as_deref(), self.context.as_deref()))
            .await
            .cloned()
    }
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("kubeconfig", &self.kubeconfig)
            .field("context", &self.context)
            .field("connected", &self.client.initialized())
            .finish_non_exhaustive()
    }
}

/// Create a kube client from an optional kubeconfig path and context
pub async fn create_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };

    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None if context.is_some() => Config::from_kubeconfig(&options).await.map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })?,
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::NodeCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for k8s_openapi::api::apps::v1::DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Whether a node reports Ready
pub fn node_is_ready(node: &Node) -> bool {
    let conditions = node.status.as_ref().and_then(|s| s.conditions.as_ref());
    has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
}

/// Whether a deployment reports Available
pub fn deployment_is_available(deployment: &Deployment) -> bool {
    let conditions = deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref());
    has_condition(conditions.map(|c| c.as_slice()), CONDITION_AVAILABLE)
}

/// Count `(ready, total)` nodes
pub async fn node_readiness(client: &Client) -> Result<(usize, usize)> {
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes.list(&ListParams::default()).await?;
    let ready = list.items.iter().filter(|n| node_is_ready(n)).count();
    Ok((ready, list.items.len()))
}

/// Single readiness probe: every deployment in `namespace` must be Available.
///
/// Does not wait; callers that need waiting retry the probe.
pub async fn ensure_deployments_available(
    client: &Client,
    component: &str,
    namespace: &str,
) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let list = deployments.list(&ListParams::default()).await?;

    if list.items.is_empty() {
        return Err(Error::not_ready(
            component,
            format!("no deployments found in namespace {}", namespace),
        ));
    }

    let unavailable: Vec<String> = list
        .items
        .iter()
        .filter(|d| !deployment_is_available(d))
        .map(|d| d.metadata.name.clone().unwrap_or_default())
        .collect();

    if !unavailable.is_empty() {
        return Err(Error::not_ready(
            component,
            format!("deployments not available: {}", unavailable.join(", ")),
        ));
    }

    debug!(namespace = %namespace, count = list.items.len(), "All deployments available");
    Ok(())
}

/// Server-side apply a JSON object through the dynamic API
pub async fn apply_json(
    client: &Client,
    api_resource: &ApiResource,
    namespace: Option<&str>,
    value: &serde_json::Value,
) -> Result<()> {
    let name = value
        .pointer("/metadata/name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| Error::serialization("object is missing metadata.name"))?;

    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, api_resource),
        None => Api::all_with(client.clone(), api_resource),
    };

    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &params, &Patch::Apply(value))
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "apply_json",
                format!("failed to apply {}/{}: {}", api_resource.kind, name, e),
            )
        })?;
    Ok(())
}

/// Delete an object through the dynamic API. Returns `false` if it was
/// already gone.
pub async fn delete_if_exists(
    client: &Client,
    api_resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
) -> Result<bool> {
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, api_resource),
        None => Api::all_with(client.clone(), api_resource),
    };

    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// ApiResource for a core/v1 Secret
pub fn secret_api_resource() -> ApiResource {
    ApiResource {
        group: String::new(),
        version: "v1".to_string(),
        api_version: "v1".to_string(),
        kind: "Secret".to_string(),
        plural: "secrets".to_string(),
    }
}

/// ApiResource for a core/v1 Namespace
pub fn namespace_api_resource() -> ApiResource {
    ApiResource {
        group: String::new(),
        version: "v1".to_string(),
        api_version: "v1".to_string(),
        kind: "Namespace".to_string(),
        plural: "namespaces".to_string(),
    }
}

/// ApiResource for a cert-manager ClusterIssuer
pub fn cluster_issuer_api_resource() -> ApiResource {
    ApiResource {
        group: "cert-manager.io".to_string(),
        version: "v1".to_string(),
        api_version: "cert-manager.io/v1".to_string(),
        kind: "ClusterIssuer".to_string(),
        plural: "clusterissuers".to_string(),
    }
}

/// Read the Ready condition of a dynamic object's `status.conditions`
pub fn dynamic_ready_condition(object: &DynamicObject) -> bool {
    object
        .data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(CONDITION_READY)
                    && c.get("status").and_then(|s| s.as_str()) == Some(STATUS_TRUE)
            })
        })
        .unwrap_or(false)
}

/// Whether a kube error is a 404
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(e) if e.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentStatus};
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};

    #[test]
    fn connection_is_lazy_and_debug_printable() {
        let connection =
            ClusterConnection::new(Some(PathBuf::from("/tmp/kubeconfig")), Some("prod".into()));
        let debug = format!("{:?}", connection);
        assert!(debug.contains("/tmp/kubeconfig"));
        assert!(debug.contains("prod"));
        assert!(debug.contains("connected: false"));
    }

    fn node_condition(type_: &str, status: &str) -> NodeCondition {
        NodeCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn has_condition_requires_true_status() {
        let conditions = vec![
            node_condition("MemoryPressure", "False"),
            node_condition("Ready", "True"),
        ];
        assert!(has_condition(Some(conditions.as_slice()), "Ready"));
        assert!(!has_condition(Some(conditions.as_slice()), "MemoryPressure"));
        assert!(!has_condition::<NodeCondition>(None, "Ready"));
    }

    #[test]
    fn node_without_status_is_not_ready() {
        assert!(!node_is_ready(&Node::default()));

        let node = Node {
            status: Some(NodeStatus {
                conditions: Some(vec![node_condition("Ready", "True")]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(node_is_ready(&node));
    }

    #[test]
    fn deployment_available_condition() {
        let deployment = Deployment {
            status: Some(DeploymentStatus {
                conditions: Some(vec![DeploymentCondition {
                    type_: "Available".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!deployment_is_available(&deployment));
    }

    #[test]
    fn dynamic_ready_condition_reads_status() {
        let ar = cluster_issuer_api_resource();
        let mut issuer = DynamicObject::new("letsencrypt-prod", &ar);
        assert!(!dynamic_ready_condition(&issuer));

        issuer.data = serde_json::json!({
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        });
        assert!(dynamic_ready_condition(&issuer));
    }

    #[test]
    fn api_resources_match_kinds() {
        assert_eq!(secret_api_resource().api_version, "v1");
        assert_eq!(cluster_issuer_api_resource().plural, "clusterissuers");
    }
}
