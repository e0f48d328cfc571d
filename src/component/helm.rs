//! Helm release installer
//!
//! Add-ons are installed with `helm upgrade --install --wait`, removed with
//! `helm uninstall`, and probed by checking that every Deployment in the
//! release namespace is Available.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Component, ComponentId};
use crate::kube_utils::{self, ClusterConnection};
use crate::process::{self, CommandSpec};
use crate::{Config, Error, Result};

/// Extra time given to the helm process beyond its own `--timeout`
const HELM_PROCESS_SLACK: Duration = Duration::from_secs(60);

/// A pinned chart and where it is installed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HelmChart {
    /// Release name
    pub release: &'static str,
    /// Chart name in the repository
    pub chart: &'static str,
    /// Chart repository URL
    pub repo: &'static str,
    /// Pinned chart version
    pub version: &'static str,
    /// Target namespace
    pub namespace: &'static str,
}

/// An installable Helm release
#[derive(Debug)]
pub struct HelmRelease {
    component: ComponentId,
    chart: HelmChart,
    values: Vec<(String, String)>,
    timeout: Duration,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    connection: Arc<ClusterConnection>,
}

impl HelmRelease {
    /// Create a release of `chart` targeting the configured cluster
    pub fn new(
        component: ComponentId,
        chart: HelmChart,
        config: &Config,
        connection: Arc<ClusterConnection>,
    ) -> Self {
        Self {
            component,
            chart,
            values: Vec::new(),
            timeout: config.command_timeout,
            kubeconfig: config.kubeconfig.clone(),
            context: config.context.clone(),
            connection,
        }
    }

    /// Add a `--set key=value` override
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((key.into(), value.into()));
        self
    }

    /// The chart this release installs
    pub fn chart(&self) -> &HelmChart {
        &self.chart
    }

    /// Shared cluster connection
    pub fn connection(&self) -> &Arc<ClusterConnection> {
        &self.connection
    }

    fn with_cluster_flags(&self, mut spec: CommandSpec) -> CommandSpec {
        if let Some(path) = &self.kubeconfig {
            spec = spec.arg("--kubeconfig").arg(path.to_string_lossy());
        }
        if let Some(context) = &self.context {
            spec = spec.arg("--kube-context").arg(context);
        }
        spec
    }

    /// `helm upgrade --install` command line
    pub fn install_command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new("helm")
            .args(["upgrade", "--install", self.chart.release, self.chart.chart])
            .args(["--repo", self.chart.repo])
            .args(["--version", self.chart.version])
            .args(["--namespace", self.chart.namespace])
            .arg("--create-namespace")
            .arg("--wait")
            .arg("--timeout")
            .arg(format!("{}s", self.timeout.as_secs()));
        for (key, value) in &self.values {
            spec = spec.arg("--set").arg(format!("{}={}", key, value));
        }
        self.with_cluster_flags(spec)
    }

    /// `helm uninstall` command line
    pub fn uninstall_command(&self) -> CommandSpec {
        let spec = CommandSpec::new("helm")
            .args(["uninstall", self.chart.release])
            .args(["--namespace", self.chart.namespace])
            .arg("--wait")
            .arg("--timeout")
            .arg(format!("{}s", self.timeout.as_secs()));
        self.with_cluster_flags(spec)
    }

    async fn deploy(&self) -> Result<()> {
        info!(
            release = %self.chart.release,
            chart = %self.chart.chart,
            version = %self.chart.version,
            namespace = %self.chart.namespace,
            "Installing Helm release"
        );
        process::run(&self.install_command(), self.timeout + HELM_PROCESS_SLACK).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        info!(
            release = %self.chart.release,
            namespace = %self.chart.namespace,
            "Uninstalling Helm release"
        );
        match process::run(&self.uninstall_command(), self.timeout + HELM_PROCESS_SLACK).await {
            Ok(_) => Ok(()),
            Err(Error::Command { message, .. }) if message.contains("not found") => {
                info!(release = %self.chart.release, "Release already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn probe(&self) -> Result<()> {
        let client = self.connection.client().await?;
        kube_utils::ensure_deployments_available(
            &client,
            self.component.as_str(),
            self.chart.namespace,
        )
        .await
    }
}

#[async_trait]
impl Component for HelmRelease {
    async fn install(&self) -> Result<()> {
        self.deploy().await
    }

    async fn uninstall(&self) -> Result<()> {
        self.remove().await
    }

    async fn health_check(&self) -> Result<()> {
        self.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: HelmChart = HelmChart {
        release: "ingress-nginx",
        chart: "ingress-nginx",
        repo: "https://kubernetes.github.io/ingress-nginx",
        version: "4.11.3",
        namespace: "ingress-nginx",
    };

    fn release(config: &Config) -> HelmRelease {
        HelmRelease::new(
            ComponentId::Ingress,
            CHART,
            config,
            Arc::new(ClusterConnection::from_config(config)),
        )
    }

    fn sample_config() -> Config {
        let mut config = Config::new("acme", "us-east-1", "platform", "example.com");
        config.command_timeout = Duration::from_secs(600);
        config
    }

    #[test]
    fn install_command_pins_chart_and_waits() {
        let release = release(&sample_config()).set("controller.replicaCount", "2");
        let line = release.install_command().display();

        assert!(line.starts_with("helm upgrade --install ingress-nginx ingress-nginx"));
        assert!(line.contains("--repo https://kubernetes.github.io/ingress-nginx"));
        assert!(line.contains("--version 4.11.3"));
        assert!(
            line.contains("--namespace ingress-nginx --create-namespace --wait --timeout 600s")
        );
        assert!(line.contains("--set controller.replicaCount=…"));
        assert!(!line.contains("--kubeconfig"));
    }

    #[test]
    fn cluster_flags_follow_config() {
        let mut config = sample_config();
        config.kubeconfig = Some(PathBuf::from("/tmp/kubeconfig"));
        config.context = Some("prod".to_string());

        let line = release(&config).uninstall_command().display();
        assert!(line.starts_with("helm uninstall ingress-nginx --namespace ingress-nginx"));
        assert!(line.ends_with("--kubeconfig /tmp/kubeconfig --kube-context prod"));
    }
}
