//! Cloud infrastructure via Terraform
//!
//! The Terraform configuration in `terraform_dir` owns the network, the
//! managed cluster and its IAM. This component only drives the CLI:
//! `init` + `apply` to install, `destroy` to tear down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Component, ComponentId};
use crate::kube_utils::{self, ClusterConnection};
use crate::process::{self, CommandSpec};
use crate::{Config, Error, Result};

/// Terraform-driven infrastructure provisioner
#[derive(Debug)]
pub struct Terraform {
    dir: PathBuf,
    vars: Vec<(&'static str, String)>,
    timeout: Duration,
    connection: Arc<ClusterConnection>,
}

impl Terraform {
    /// Provisioner for the configured project, region and cluster
    pub fn from_config(config: &Config, connection: Arc<ClusterConnection>) -> Self {
        Self {
            dir: config.terraform_dir.clone(),
            vars: vec![
                ("project", config.project.clone()),
                ("region", config.region.clone()),
                ("cluster_name", config.cluster_name.clone()),
                ("domain", config.domain.clone()),
            ],
            timeout: config.command_timeout,
            connection,
        }
    }

    fn terraform(&self, subcommand: &str) -> CommandSpec {
        CommandSpec::new("terraform")
            .arg(subcommand)
            .current_dir(&self.dir)
            .env("TF_IN_AUTOMATION", "1")
    }

    fn with_vars(&self, mut spec: CommandSpec) -> CommandSpec {
        for (name, value) in &self.vars {
            spec = spec.arg("-var").arg(format!("{}={}", name, value));
        }
        spec
    }

    /// `terraform init`
    pub fn init_command(&self) -> CommandSpec {
        self.terraform("init").arg("-input=false")
    }

    /// `terraform apply` with the run variables
    pub fn apply_command(&self) -> CommandSpec {
        self.with_vars(
            self.terraform("apply")
                .arg("-auto-approve")
                .arg("-input=false"),
        )
    }

    /// `terraform destroy` with the run variables
    pub fn destroy_command(&self) -> CommandSpec {
        self.with_vars(
            self.terraform("destroy")
                .arg("-auto-approve")
                .arg("-input=false"),
        )
    }

    /// `terraform output -json`
    pub fn output_command(&self) -> CommandSpec {
        // outputs may include sensitive values
        self.terraform("output").arg("-json").quiet()
    }
}

#[async_trait]
impl Component for Terraform {
    async fn install(&self) -> Result<()> {
        info!(dir = %self.dir.display(), "Initializing Terraform");
        process::run(&self.init_command(), self.timeout).await?;

        info!(dir = %self.dir.display(), "Applying Terraform configuration");
        process::run(&self.apply_command(), self.timeout).await?;
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        info!(dir = %self.dir.display(), "Destroying Terraform-managed infrastructure");
        process::run(&self.destroy_command(), self.timeout).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let outputs = process::run(&self.output_command(), self.timeout).await?;
        check_outputs(&outputs)?;

        let client = self.connection.client().await?;
        let (ready, total) = kube_utils::node_readiness(&client).await?;
        if ready == 0 {
            return Err(Error::not_ready(
                ComponentId::Infrastructure.as_str(),
                format!("no Ready nodes ({} registered)", total),
            ));
        }
        info!(ready, total, "Cluster nodes ready");
        Ok(())
    }
}

/// `terraform output -json` must yield a JSON object once state exists
fn check_outputs(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    match value.as_object() {
        Some(outputs) if !outputs.is_empty() => Ok(()),
        Some(_) => Err(Error::not_ready(
            ComponentId::Infrastructure.as_str(),
            "terraform state has no outputs",
        )),
        None => Err(Error::serialization(
            "terraform output is not a JSON object",
        )),
    }
}
