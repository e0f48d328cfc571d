//! Diagnose command - read-only checks with remediation
//!
//! Runs every check regardless of earlier failures and prints them grouped
//! by category. Exits non-zero if any check failed.

use std::sync::Arc;

use clap::Args;

use super::format;
use super::{OutputFormat, SkipArgs, TargetArgs};
use crate::component::ComponentId;
use crate::kube_utils::ClusterConnection;
use crate::telemetry::Logger;
use crate::validate::{KubeInspector, Validator};
use crate::{Config, Result};

/// Diagnose a deployed platform
#[derive(Args, Debug)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    skip: SkipArgs,

    /// Only check this component: infrastructure (cluster nodes), ingress,
    /// cert-manager or external-dns
    #[arg(long, value_parser = parse_component)]
    pub(super) component: Option<ComponentId>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub(super) output: OutputFormat,
}

impl DiagnoseArgs {
    /// Run configuration for these flags
    pub fn to_config(&self) -> Config {
        let mut config = self.target.to_config();
        config.skip = self.skip.into();
        config
    }
}

/// Components that own checks; `validation` is the whole battery, not a filter
fn parse_component(s: &str) -> std::result::Result<ComponentId, String> {
    match s.parse::<ComponentId>()? {
        ComponentId::Validation => Err(
            "'validation' runs every check; omit --component instead, or pick one of: \
             infrastructure, ingress, cert-manager, external-dns"
                .to_string(),
        ),
        component => Ok(component),
    }
}

/// Run the diagnose command. Returns whether every check passed.
pub async fn run(args: DiagnoseArgs, logger: Logger) -> Result<bool> {
    let config = args.to_config();
    config.validate_target()?;

    let connection = Arc::new(ClusterConnection::from_config(&config));
    let validator = Validator::new(&config, Arc::new(KubeInspector::new(connection)), logger);
    let result = validator.run_diagnostics(args.component).await;

    match args.output {
        OutputFormat::Table => print!("{}", format::diagnostics_report(&result)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    Ok(result.all_passed)
}
