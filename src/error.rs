//! Error types for Launchpad
//!
//! Errors carry the operation or component they came from so that the text
//! stored on a step or diagnostic result reads as a full chain, e.g.
//! `health check failed: cert-manager: deployment cert-manager-webhook not available`.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Launchpad operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An external command exited unsuccessfully or could not be started
    #[error("command `{command}` failed: {message}")]
    Command {
        /// The command line that failed
        command: String,
        /// Captured stderr or spawn error
        message: String,
    },

    /// An operation exceeded its own deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was running
        operation: String,
        /// The deadline that elapsed
        after: Duration,
    },

    /// A post-install readiness probe failed
    #[error("health check failed: {source}")]
    HealthCheck {
        /// Component whose probe failed
        component: String,
        /// Why the probe failed
        source: Box<Error>,
    },

    /// A component is installed but not ready
    #[error("{component}: {message}")]
    NotReady {
        /// Component being probed
        component: String,
        /// What is not ready yet
        message: String,
    },

    /// One or more validation checks failed
    #[error("validation failed: {failed} of {total} checks failed ({checks})")]
    Validation {
        /// Number of failing checks
        failed: usize,
        /// Number of checks evaluated
        total: usize,
        /// Comma-separated names of the failing checks
        checks: String,
    },

    /// Invalid run configuration
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// The run was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a command error
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Wrap a probe failure as a health-check failure of `component`
    pub fn health_check(component: impl Into<String>, source: Error) -> Self {
        Self::HealthCheck {
            component: component.into(),
            source: Box::new(source),
        }
    }

    /// Create a not-ready error for a component
    pub fn not_ready(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotReady {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from cancellation rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
