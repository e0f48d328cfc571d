//! Launchpad - ordered, health-gated bootstrap of a cloud platform
//!
//! Launchpad brings up a platform deployment (cloud infrastructure, cluster
//! add-ons, DNS and TLS automation) by running a fixed sequence of installation
//! steps. Each step is gated by a post-install health check, retried a bounded
//! number of times, and rolled back best-effort if the run fails.
//!
//! # Architecture
//!
//! - Every installable unit implements the [`component::Component`] contract
//!   (`install`, `uninstall`, `health_check`).
//! - The [`bootstrap::Orchestrator`] walks the [`bootstrap::StepRegistry`] in
//!   order through the [`bootstrap::RetryExecutor`] and stops at the first
//!   failed step.
//! - The [`bootstrap::RollbackController`] tears down succeeded steps in
//!   reverse order.
//! - The [`validate::Validator`] is a read-only diagnostics battery, used both
//!   as the final bootstrap step and as a standalone troubleshooting command.
//!
//! # Modules
//!
//! - [`bootstrap`] - Orchestrator, retry executor, step registry, rollback
//! - [`component`] - Component contract and the concrete installers
//! - [`validate`] - Validation and diagnostics engine
//! - [`config`] - Immutable run configuration
//! - [`commands`] - CLI surface
//! - [`telemetry`] - Injected logger handle
//! - [`kube_utils`] - Cluster connection and readiness probes
//! - [`process`] - External command execution with timeouts
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod bootstrap;
pub mod commands;
pub mod component;
pub mod config;
pub mod error;
pub mod kube_utils;
pub mod process;
pub mod telemetry;
pub mod validate;

pub use commands::Cli;
pub use config::Config;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Maximum number of attempts per step (one initial attempt plus two retries)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry delay step; attempt `n` waits `n * DEFAULT_RETRY_DELAY_STEP`
pub const DEFAULT_RETRY_DELAY_STEP: std::time::Duration = std::time::Duration::from_secs(10);

/// Default timeout for a single external command (terraform, helm)
pub const DEFAULT_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// Name of the ACME ClusterIssuer created by the cert-manager step
pub const CLUSTER_ISSUER_NAME: &str = "letsencrypt-prod";

/// Name of the Secret holding the DNS provider token for external-dns
pub const DNS_TOKEN_SECRET_NAME: &str = "cloudflare-api-token";

/// Key inside [`DNS_TOKEN_SECRET_NAME`] holding the token
pub const DNS_TOKEN_SECRET_KEY: &str = "api-token";
