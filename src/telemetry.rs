//! Logging setup
//!
//! The subscriber is built once at process start and handed to the components
//! that log, instead of being installed as the process-wide default. Work runs
//! under the injected dispatcher via [`Logger::scope`], so structured fields
//! (`step`, `attempt`, `error`, ...) reach the configured output while tests
//! can run with [`Logger::disabled`].

use std::future::Future;

use clap::ValueEnum;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logger configuration
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub default_filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Handle to a tracing dispatcher, passed explicitly to whatever logs
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    /// Build a logger writing to stderr
    pub fn new(config: &LogConfig) -> Self {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));
        let registry = tracing_subscriber::registry().with(filter);

        let dispatch = match config.format {
            LogFormat::Text => Dispatch::new(
                registry.with(
                    fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                ),
            ),
            LogFormat::Json => Dispatch::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                ),
            ),
        };

        Self { dispatch }
    }

    /// A logger that drops everything
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Run a future with this logger as its default dispatcher
    pub fn scope<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch.clone())
    }

    /// Run a closure with this logger as its default dispatcher
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
