//! Bootstrap command - provision and install the platform in order
//!
//! 1. Build and validate the run config from flags
//! 2. Check the external tools the enabled steps need
//! 3. Run the orchestrator, printing one line per completed step
//! 4. On failure, roll back succeeded steps unless `--keep-on-failure` was
//!    given or the run was interrupted

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::format;
use super::{OutputFormat, SkipArgs, TargetArgs};
use crate::bootstrap::{Orchestrator, RetryExecutor, RetryPolicy, StepResult};
use crate::component::ComponentSet;
use crate::kube_utils::ClusterConnection;
use crate::process;
use crate::telemetry::Logger;
use crate::validate::{KubeInspector, Validator};
use crate::{Config, Error, Result};

/// Bootstrap the platform
#[derive(Args, Debug)]
pub struct BootstrapArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    skip: SkipArgs,

    /// Contact e-mail for the ACME (Let's Encrypt) account
    #[arg(long, env = "ACME_EMAIL", default_value = "")]
    acme_email: String,

    /// DNS provider API token used by external-dns
    #[arg(long, env = "DNS_API_TOKEN", hide_env_values = true, default_value = "")]
    dns_token: String,

    /// Directory holding the Terraform configuration
    #[arg(long, env = "LAUNCHPAD_TERRAFORM_DIR", default_value = "infra")]
    terraform_dir: PathBuf,

    /// Timeout for each external command, in seconds
    #[arg(long, value_name = "SECONDS", default_value = "900")]
    command_timeout: u64,

    /// Dry run - report what would be done without making changes
    #[arg(long)]
    dry_run: bool,

    /// Leave succeeded steps in place when a later step fails
    #[arg(long)]
    keep_on_failure: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub(super) output: OutputFormat,
}

impl BootstrapArgs {
    /// Run configuration for these flags
    pub fn to_config(&self) -> Config {
        let mut config = self.target.to_config();
        config.acme_email = self.acme_email.clone();
        config.dns_token = self.dns_token.clone();
        config.skip = self.skip.into();
        config.terraform_dir = self.terraform_dir.clone();
        config.command_timeout = Duration::from_secs(self.command_timeout);
        config.dry_run = self.dry_run;
        config
    }
}

/// Tools each enabled part of the run shells out to
fn required_tools(config: &Config) -> Vec<(&'static str, &'static str)> {
    let mut tools = Vec::new();
    if !config.skip.infrastructure {
        tools.push((
            "terraform",
            "https://developer.hashicorp.com/terraform/install",
        ));
    }
    if !config.skip.all_addons_skipped() {
        tools.push(("helm", "https://helm.sh/docs/intro/install/"));
    }
    tools
}

async fn check_prerequisites(config: &Config) -> Result<()> {
    for (tool, install_url) in required_tools(config) {
        if !process::tool_available(tool).await {
            return Err(Error::command(
                tool,
                format!("not found on PATH; install it from {}", install_url),
            ));
        }
    }
    Ok(())
}

/// What to do with succeeded steps once a run has failed
#[derive(Debug, PartialEq, Eq)]
enum AfterFailure {
    Rollback,
    Keep(&'static str),
}

/// An interrupted run is never rolled back automatically: teardown is slow
/// and the operator asked for the process to stop.
fn after_failure(keep_on_failure: bool, interrupted: bool) -> AfterFailure {
    if interrupted {
        AfterFailure::Keep("interrupted")
    } else if keep_on_failure {
        AfterFailure::Keep("--keep-on-failure")
    } else {
        AfterFailure::Rollback
    }
}

/// Run the bootstrap command. Returns whether the run succeeded.
pub async fn run(args: BootstrapArgs, logger: Logger, cancel: CancellationToken) -> Result<bool> {
    let config = args.to_config();
    config.validate()?;

    if !config.dry_run {
        check_prerequisites(&config).await?;
    }

    let connection = Arc::new(ClusterConnection::from_config(&config));
    let validator = Arc::new(Validator::new(
        &config,
        Arc::new(KubeInspector::new(connection.clone())),
        logger.clone(),
    ));
    let components = ComponentSet::from_config(&config, connection, validator);
    let executor = RetryExecutor::new(components.clone(), RetryPolicy::default())
        .with_cancellation(cancel.clone());
    let orchestrator = Orchestrator::new(&config, components, logger).with_executor(executor);

    let table = args.output == OutputFormat::Table;
    if table {
        let mode = if config.dry_run { " (dry run)" } else { "" };
        println!(
            "Bootstrapping {} in {}/{}{}",
            config.cluster_name, config.project, config.region, mode
        );
    }

    let mut progress = |step: &StepResult| {
        if table {
            println!("{}", format::step_line(step));
        }
    };
    let result = orchestrator.run(Some(&mut progress)).await;

    match args.output {
        OutputFormat::Table => println!("\n{}", format::bootstrap_summary(&result)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    if result.success {
        return Ok(true);
    }

    if let Some(step) = result.failed_step() {
        eprintln!(
            "error: step '{}' failed: {}",
            step.name,
            step.error.as_deref().unwrap_or(&step.message)
        );
    }

    match after_failure(args.keep_on_failure, cancel.is_cancelled()) {
        AfterFailure::Rollback => {}
        AfterFailure::Keep(reason) => {
            warn!(reason, "Keeping succeeded steps in place");
            if table {
                println!("Succeeded steps left in place ({})", reason);
            }
            return Ok(false);
        }
    }

    info!("Rolling back succeeded steps");
    let report = orchestrator.rollback(&result).await?;
    if table {
        println!("Rollback:");
        for line in format::rollback_lines(&report) {
            println!("{}", line);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> Config {
        Config::new("acme", "us-east-1", "platform", "example.com")
    }

    #[test]
    fn both_tools_needed_by_default() {
        let tools: Vec<_> = required_tools(&config()).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tools, vec!["terraform", "helm"]);
    }

    #[test]
    fn helm_not_needed_when_every_addon_is_skipped() {
        let mut config = config();
        config.skip.ingress = true;
        config.skip.cert_manager = true;
        config.skip.external_dns = true;
        let tools: Vec<_> = required_tools(&config).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tools, vec!["terraform"]);

        config.skip.infrastructure = true;
        assert!(required_tools(&config).is_empty());
    }

    #[rstest]
    #[case(false, false, AfterFailure::Rollback)]
    #[case(true, false, AfterFailure::Keep("--keep-on-failure"))]
    #[case(false, true, AfterFailure::Keep("interrupted"))]
    #[case(true, true, AfterFailure::Keep("interrupted"))]
    fn rollback_only_for_uninterrupted_runs(
        #[case] keep_on_failure: bool,
        #[case] interrupted: bool,
        #[case] expected: AfterFailure,
    ) {
        assert_eq!(after_failure(keep_on_failure, interrupted), expected);
    }

    #[tokio::test]
    async fn invalid_config_is_a_config_error() {
        use clap::Parser;

        let cli = crate::Cli::try_parse_from([
            "launchpad",
            "bootstrap",
            "--project",
            "acme",
            "--region",
            "us-east-1",
            "--cluster",
            "platform",
            "--domain",
            "localhost",
            "--dry-run",
        ])
        .unwrap();
        let err = cli
            .run(Logger::disabled(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
