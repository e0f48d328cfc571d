//! Launchpad CLI
//!
//! Exit codes: 0 on success, 1 when a step or check failed, 2 on invalid
//! configuration, 130 when a bootstrap is aborted by a second Ctrl-C.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use launchpad::bootstrap::{cancel_on_ctrl_c, interrupted_again};
use launchpad::commands::Commands;
use launchpad::telemetry::{LogConfig, Logger};
use launchpad::{Cli, Error};

#[tokio::main]
async fn main() -> ExitCode {
    // Install the crypto provider before any TLS client is created
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    let logger = Logger::new(&LogConfig {
        format: cli.log_format,
        ..Default::default()
    });

    // Only bootstrap watches the token; every other command keeps the
    // default SIGINT behaviour.
    let result = if matches!(cli.command, Commands::Bootstrap(_)) {
        let cancel = cancel_on_ctrl_c();
        tokio::select! {
            result = logger.scope(cli.run(logger.clone(), cancel.clone())) => result,
            _ = interrupted_again(&cancel) => {
                eprintln!("error: interrupted twice, aborting without rollback");
                return ExitCode::from(130);
            }
        }
    } else {
        logger
            .scope(cli.run(logger.clone(), CancellationToken::new()))
            .await
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e @ Error::Config { .. }) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}
