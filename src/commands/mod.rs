//! CLI commands
//!
//! `launchpad bootstrap` runs the ordered install; `launchpad diagnose` runs
//! the read-only checks. Both build an immutable [`Config`] from flags (each
//! with an environment fallback) and hand it to the engine by reference.

pub mod bootstrap;
pub mod diagnose;
mod format;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use crate::config::SkipFlags;
use crate::telemetry::{LogFormat, Logger};
use crate::{Config, Result};

/// Launchpad - bring up a platform: infrastructure, ingress, TLS and DNS
#[derive(Parser, Debug)]
#[command(name = "launchpad")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log line format
    #[arg(long, value_enum, default_value = "text", env = "LAUNCHPAD_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision infrastructure and install the cluster add-ons in order
    Bootstrap(bootstrap::BootstrapArgs),
    /// Check a deployed platform and explain what is wrong
    Diagnose(diagnose::DiagnoseArgs),
}

impl Cli {
    /// Run the selected command.
    ///
    /// `Ok(true)` means the run succeeded, `Ok(false)` that it completed and
    /// reported failure (failed step or failing checks).
    pub async fn run(self, logger: Logger, cancel: CancellationToken) -> Result<bool> {
        match self.command {
            Commands::Bootstrap(args) => bootstrap::run(args, logger, cancel).await,
            Commands::Diagnose(args) => diagnose::run(args, logger).await,
        }
    }
}

/// Output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable progress and report (default)
    #[default]
    Table,
    /// JSON
    Json,
}

/// Which deployment to act on
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Cloud project / account identifier
    #[arg(long, env = "LAUNCHPAD_PROJECT")]
    pub project: String,

    /// Cloud region
    #[arg(long, env = "LAUNCHPAD_REGION")]
    pub region: String,

    /// Kubernetes cluster name
    #[arg(long = "cluster", env = "LAUNCHPAD_CLUSTER")]
    pub cluster_name: String,

    /// Public domain served by the platform
    #[arg(long, env = "LAUNCHPAD_DOMAIN")]
    pub domain: String,

    /// Path to kubeconfig file (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context (default: current context)
    #[arg(long, env = "LAUNCHPAD_CONTEXT")]
    pub context: Option<String>,
}

impl TargetArgs {
    /// Base config for this target; everything else at its default
    pub fn to_config(&self) -> Config {
        let mut config = Config::new(
            self.project.clone(),
            self.region.clone(),
            self.cluster_name.clone(),
            self.domain.clone(),
        );
        config.kubeconfig = self.kubeconfig.clone();
        config.context = self.context.clone();
        config
    }
}

/// One flag per optional component
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct SkipArgs {
    /// Skip Terraform infrastructure provisioning (use an existing cluster)
    #[arg(long)]
    pub skip_infrastructure: bool,

    /// Skip the ingress controller
    #[arg(long)]
    pub skip_ingress: bool,

    /// Skip cert-manager and the ACME ClusterIssuer
    #[arg(long)]
    pub skip_cert_manager: bool,

    /// Skip external-dns
    #[arg(long = "skip-external-dns")]
    pub skip_external_dns: bool,

    /// Skip post-install validation
    #[arg(long)]
    pub skip_validation: bool,
}

impl From<SkipArgs> for SkipFlags {
    fn from(args: SkipArgs) -> Self {
        SkipFlags {
            infrastructure: args.skip_infrastructure,
            ingress: args.skip_ingress,
            cert_manager: args.skip_cert_manager,
            external_dns: args.skip_external_dns,
            validation: args.skip_validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentId;

    const TARGET: [&str; 8] = [
        "--project",
        "acme",
        "--region",
        "us-east-1",
        "--cluster",
        "platform",
        "--domain",
        "example.com",
    ];

    fn parse(args: &[&str]) -> Cli {
        let argv = std::iter::once("launchpad").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn bootstrap_flags_build_a_config() {
        let mut args = vec!["bootstrap"];
        args.extend(TARGET);
        args.extend([
            "--acme-email",
            "ops@example.com",
            "--dns-token",
            "token",
            "--skip-external-dns",
            "--dry-run",
            "--command-timeout",
            "120",
        ]);

        let Commands::Bootstrap(bootstrap) = parse(&args).command else {
            panic!("expected bootstrap");
        };
        let config = bootstrap.to_config();

        assert_eq!(config.project, "acme");
        assert_eq!(config.cluster_name, "platform");
        assert_eq!(config.acme_email, "ops@example.com");
        assert!(config.dry_run);
        assert!(config.skip.external_dns);
        assert!(!config.skip.ingress);
        assert_eq!(config.command_timeout, std::time::Duration::from_secs(120));
        assert!(config.validate().is_ok());
        assert_eq!(bootstrap.output, OutputFormat::Table);
    }

    #[test]
    fn diagnose_accepts_a_component_filter() {
        let mut args = vec!["diagnose"];
        args.extend(TARGET);
        args.extend(["--component", "cert-manager", "--output", "json"]);

        let Commands::Diagnose(diagnose) = parse(&args).command else {
            panic!("expected diagnose");
        };
        assert_eq!(diagnose.component, Some(ComponentId::CertManager));
        assert_eq!(diagnose.output, OutputFormat::Json);
    }

    #[test]
    fn unknown_component_is_rejected() {
        let mut args = vec!["launchpad", "diagnose"];
        args.extend(TARGET);
        args.extend(["--component", "postgres"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn log_format_is_global() {
        let mut args = vec!["diagnose"];
        args.extend(TARGET);
        args.extend(["--log-format", "json"]);
        assert_eq!(parse(&args).log_format, LogFormat::Json);
    }

    #[test]
    fn skip_args_map_to_flags() {
        let flags = SkipFlags::from(SkipArgs {
            skip_ingress: true,
            skip_validation: true,
            ..Default::default()
        });
        assert!(flags.ingress);
        assert!(flags.validation);
        assert!(!flags.cert_manager);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
