//! Individual checks and what each add-on is expected to have running

use super::inspector::ClusterInspector;
use super::{CheckCategory, DiagnosticCheck};
use crate::component::{ComponentId, CERT_MANAGER, EXTERNAL_DNS, INGRESS_NGINX};
use crate::{CLUSTER_ISSUER_NAME, DNS_TOKEN_SECRET_NAME};

/// Pods expected to be running for a component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PodExpectation {
    /// Label selector
    pub selector: &'static str,
    /// Minimum number of `Running` pods
    pub min: usize,
}

/// What a healthy add-on looks like in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expectation {
    /// Component this describes
    pub component: ComponentId,
    /// Namespace everything lives in
    pub namespace: &'static str,
    /// Running pods
    pub pods: PodExpectation,
    /// Services that must exist
    pub services: &'static [&'static str],
    /// Secrets that must exist
    pub secrets: &'static [&'static str],
}

/// Expectations for the namespaced add-ons, in registry order
pub const EXPECTATIONS: [Expectation; 3] = [
    Expectation {
        component: ComponentId::Ingress,
        namespace: INGRESS_NGINX.namespace,
        pods: PodExpectation {
            selector: "app.kubernetes.io/name=ingress-nginx",
            min: 1,
        },
        services: &["ingress-nginx-controller"],
        secrets: &[],
    },
    Expectation {
        component: ComponentId::CertManager,
        namespace: CERT_MANAGER.namespace,
        // controller, cainjector, webhook
        pods: PodExpectation {
            selector: "app.kubernetes.io/instance=cert-manager",
            min: 3,
        },
        services: &["cert-manager-webhook"],
        secrets: &[],
    },
    Expectation {
        component: ComponentId::ExternalDns,
        namespace: EXTERNAL_DNS.namespace,
        pods: PodExpectation {
            selector: "app.kubernetes.io/name=external-dns",
            min: 1,
        },
        services: &[],
        secrets: &[DNS_TOKEN_SECRET_NAME],
    },
];

/// Expectation for a namespaced add-on
pub fn expectation(component: ComponentId) -> Option<&'static Expectation> {
    EXPECTATIONS.iter().find(|e| e.component == component)
}

const CONNECTIVITY: &str = "Kubernetes API connectivity";

pub(super) async fn connectivity(inspector: &dyn ClusterInspector) -> DiagnosticCheck {
    match inspector.server_version().await {
        Ok(version) => DiagnosticCheck::pass(
            CONNECTIVITY,
            CheckCategory::Connectivity,
            format!("Connected to Kubernetes {}", version),
        ),
        Err(e) => DiagnosticCheck::fail(
            CONNECTIVITY,
            CheckCategory::Connectivity,
            "Cannot reach the Kubernetes API server",
            "Check the kubeconfig path and context (--kubeconfig, --context) and that the \
             cluster endpoint is reachable from this machine",
        )
        .with_error(e),
    }
}

pub(super) async fn nodes_ready(inspector: &dyn ClusterInspector) -> DiagnosticCheck {
    const NAME: &str = "Cluster nodes ready";
    match inspector.node_readiness().await {
        Ok((ready, total)) if ready > 0 => DiagnosticCheck::pass(
            NAME,
            CheckCategory::Cluster,
            format!("{} of {} nodes Ready", ready, total),
        ),
        Ok((_, total)) => DiagnosticCheck::fail(
            NAME,
            CheckCategory::Cluster,
            format!("No Ready nodes ({} registered)", total),
            "Inspect node conditions with `kubectl describe nodes`; re-run the bootstrap \
             if the node pool was never created",
        ),
        Err(e) => DiagnosticCheck::fail(
            NAME,
            CheckCategory::Cluster,
            "Could not list nodes",
            "Make sure the credentials in use may list nodes",
        )
        .with_error(e),
    }
}

pub(super) async fn namespace(
    inspector: &dyn ClusterInspector,
    expected: &Expectation,
) -> DiagnosticCheck {
    let name = format!("Namespace {}", expected.namespace);
    let category = CheckCategory::from(expected.component);
    match inspector.namespace_exists(expected.namespace).await {
        Ok(true) => DiagnosticCheck::pass(name, category, "Namespace exists"),
        Ok(false) => DiagnosticCheck::fail(
            name,
            category,
            format!("Namespace {} not found", expected.namespace),
            format!(
                "{} is not installed; re-run the bootstrap without --skip-{}",
                expected.component, expected.component
            ),
        ),
        Err(e) => DiagnosticCheck::fail(
            name,
            category,
            "Could not read namespace",
            "Check cluster connectivity and RBAC permissions",
        )
        .with_error(e),
    }
}

pub(super) async fn pods(
    inspector: &dyn ClusterInspector,
    expected: &Expectation,
) -> DiagnosticCheck {
    let name = format!("{} pods running", expected.component);
    let category = CheckCategory::from(expected.component);
    let PodExpectation { selector, min } = expected.pods;
    match inspector.running_pods(expected.namespace, selector).await {
        Ok(running) if running >= min => DiagnosticCheck::pass(
            name,
            category,
            format!("{} pods running (expected at least {})", running, min),
        ),
        Ok(running) => DiagnosticCheck::fail(
            name,
            category,
            format!("{} pods running, expected at least {}", running, min),
            format!(
                "Inspect the pods with `kubectl -n {} get pods -l {}` and their events",
                expected.namespace, selector
            ),
        ),
        Err(e) => DiagnosticCheck::fail(
            name,
            category,
            "Could not list pods",
            "Check cluster connectivity and RBAC permissions",
        )
        .with_error(e),
    }
}

pub(super) async fn service(
    inspector: &dyn ClusterInspector,
    expected: &Expectation,
    service: &str,
) -> DiagnosticCheck {
    let name = format!("Service {}", service);
    let category = CheckCategory::from(expected.component);
    match inspector.service_exists(expected.namespace, service).await {
        Ok(true) => DiagnosticCheck::pass(name, category, "Service exists"),
        Ok(false) => DiagnosticCheck::fail(
            name,
            category,
            format!("Service {}/{} not found", expected.namespace, service),
            format!(
                "Reinstall {} to restore its service: the Helm release may be incomplete",
                expected.component
            ),
        ),
        Err(e) => DiagnosticCheck::fail(
            name,
            category,
            "Could not read service",
            "Check cluster connectivity and RBAC permissions",
        )
        .with_error(e),
    }
}

pub(super) async fn secret(
    inspector: &dyn ClusterInspector,
    expected: &Expectation,
    secret: &str,
) -> DiagnosticCheck {
    let name = format!("Secret {}", secret);
    let category = CheckCategory::from(expected.component);
    match inspector.secret_exists(expected.namespace, secret).await {
        Ok(true) => DiagnosticCheck::pass(name, category, "Secret exists"),
        Ok(false) => DiagnosticCheck::fail(
            name,
            category,
            format!("Secret {}/{} not found", expected.namespace, secret),
            "Re-run the bootstrap with the DNS provider token set (DNS_API_TOKEN)",
        ),
        Err(e) => DiagnosticCheck::fail(
            name,
            category,
            "Could not read secret",
            "Make sure the credentials in use may read secrets in this namespace",
        )
        .with_error(e),
    }
}

pub(super) async fn load_balancer(inspector: &dyn ClusterInspector) -> DiagnosticCheck {
    const NAME: &str = "Ingress load balancer address";
    let service = "ingress-nginx-controller";
    match inspector
        .load_balancer_address(INGRESS_NGINX.namespace, service)
        .await
    {
        Ok(Some(address)) => DiagnosticCheck::pass(
            NAME,
            CheckCategory::Ingress,
            format!("Load balancer address {}", address),
        ),
        Ok(None) => DiagnosticCheck::fail(
            NAME,
            CheckCategory::Ingress,
            "No external address assigned to the ingress controller",
            format!(
                "Check `kubectl -n {} describe service {}` for load balancer provisioning \
                 events and the cloud provider's quota",
                INGRESS_NGINX.namespace, service
            ),
        ),
        Err(e) => DiagnosticCheck::fail(
            NAME,
            CheckCategory::Ingress,
            "Could not read the ingress controller service",
            "Check cluster connectivity and RBAC permissions",
        )
        .with_error(e),
    }
}

pub(super) async fn cluster_issuer(inspector: &dyn ClusterInspector) -> DiagnosticCheck {
    let name = format!("ClusterIssuer {} ready", CLUSTER_ISSUER_NAME);
    match inspector.cluster_issuer_ready(CLUSTER_ISSUER_NAME).await {
        Ok(Some(true)) => {
            DiagnosticCheck::pass(name, CheckCategory::Tls, "ACME account registered")
        }
        Ok(Some(false)) => DiagnosticCheck::fail(
            name,
            CheckCategory::Tls,
            "ClusterIssuer exists but is not Ready",
            format!(
                "Check `kubectl describe clusterissuer {}`; the ACME e-mail may be rejected \
                 or the ACME server unreachable",
                CLUSTER_ISSUER_NAME
            ),
        ),
        Ok(None) => DiagnosticCheck::fail(
            name,
            CheckCategory::Tls,
            "ClusterIssuer not found",
            "Re-run the bootstrap to create the ACME ClusterIssuer",
        ),
        Err(e) => DiagnosticCheck::fail(
            name,
            CheckCategory::Tls,
            "Could not read ClusterIssuer",
            "Check that the cert-manager CRDs are installed",
        )
        .with_error(e),
    }
}

pub(super) async fn dns_resolves(
    inspector: &dyn ClusterInspector,
    domain: &str,
) -> DiagnosticCheck {
    let name = format!("DNS resolves {}", domain);
    match inspector.resolve_host(domain).await {
        Ok(addrs) if !addrs.is_empty() => {
            let shown: Vec<String> = addrs.iter().map(ToString::to_string).collect();
            DiagnosticCheck::pass(
                name,
                CheckCategory::Dns,
                format!("Resolves to {}", shown.join(", ")),
            )
        }
        Ok(_) => DiagnosticCheck::fail(
            name,
            CheckCategory::Dns,
            "No addresses returned",
            dns_remediation(domain),
        ),
        Err(e) => DiagnosticCheck::fail(
            name,
            CheckCategory::Dns,
            "Lookup failed",
            dns_remediation(domain),
        )
        .with_error(e),
    }
}

fn dns_remediation(domain: &str) -> String {
    format!(
        "Check the external-dns logs for record updates and that the zone for {} is \
         delegated to the DNS provider; new records can take a few minutes to propagate",
        domain
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::inspector::MockClusterInspector;
    use crate::Error;

    fn ingress() -> &'static Expectation {
        expectation(ComponentId::Ingress).unwrap()
    }

    #[test]
    fn expectations_cover_the_helm_add_ons() {
        let covered: Vec<_> = EXPECTATIONS.iter().map(|e| e.component).collect();
        assert_eq!(
            covered,
            vec![ComponentId::Ingress, ComponentId::CertManager, ComponentId::ExternalDns]
        );
        assert!(expectation(ComponentId::Infrastructure).is_none());
        assert_eq!(expectation(ComponentId::CertManager).unwrap().pods.min, 3);
        assert_eq!(
            expectation(ComponentId::ExternalDns).unwrap().secrets,
            &[DNS_TOKEN_SECRET_NAME]
        );
    }

    #[tokio::test]
    async fn too_few_pods_fails_with_remediation() {
        let mut inspector = MockClusterInspector::new();
        inspector.expect_running_pods().returning(|_, _| Ok(0));

        let check = pods(&inspector, ingress()).await;
        assert!(!check.passed);
        assert_eq!(check.message, "0 pods running, expected at least 1");
        assert!(check.remediation.unwrap().contains("kubectl -n ingress-nginx get pods"));
    }

    #[tokio::test]
    async fn inspector_error_is_kept_on_the_check() {
        let mut inspector = MockClusterInspector::new();
        inspector
            .expect_service_exists()
            .returning(|_, _| Err(Error::internal_with_context("list", "forbidden")));

        let check = service(&inspector, ingress(), "ingress-nginx-controller").await;
        assert!(!check.passed);
        assert!(check.error.unwrap().contains("forbidden"));
    }

    #[tokio::test]
    async fn no_ready_nodes_fails() {
        let mut inspector = MockClusterInspector::new();
        inspector.expect_node_readiness().returning(|| Ok((0, 3)));

        let check = nodes_ready(&inspector).await;
        assert!(!check.passed);
        assert_eq!(check.category, CheckCategory::Cluster);
        assert!(check.message.contains("3 registered"));
    }

    #[tokio::test]
    async fn missing_issuer_and_unready_issuer_are_distinguished() {
        let mut missing = MockClusterInspector::new();
        missing.expect_cluster_issuer_ready().returning(|_| Ok(None));
        let mut pending = MockClusterInspector::new();
        pending
            .expect_cluster_issuer_ready()
            .returning(|_| Ok(Some(false)));

        assert_eq!(cluster_issuer(&missing).await.message, "ClusterIssuer not found");
        assert_eq!(
            cluster_issuer(&pending).await.message,
            "ClusterIssuer exists but is not Ready"
        );
    }

    #[tokio::test]
    async fn dns_lists_resolved_addresses() {
        let mut inspector = MockClusterInspector::new();
        inspector
            .expect_resolve_host()
            .returning(|_| Ok(vec!["203.0.113.7".parse().unwrap()]));

        let check = dns_resolves(&inspector, "example.com").await;
        assert!(check.passed);
        assert_eq!(check.message, "Resolves to 203.0.113.7");
        assert!(check.remediation.is_none());
    }
}
