//! Step and run results

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::Step;
use crate::component::ComponentId;

/// Lifecycle state of a step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not started yet
    Pending,
    /// An attempt is in progress
    Running,
    /// Waiting before the next attempt
    Retrying,
    /// Install (and health check, if any) succeeded
    Success,
    /// Attempts exhausted, or the run was cancelled
    Failed,
    /// Disabled by configuration; nothing was called
    Skipped,
}

impl StepStatus {
    /// Whether the status can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Retrying => "retrying",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// Outcome of one step in one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name, e.g. `install-ingress`
    pub name: String,
    /// Component the step installs
    pub component: ComponentId,
    /// Final status
    pub status: StepStatus,
    /// When the step started
    pub start_time: DateTime<Utc>,
    /// When the step finished
    pub end_time: DateTime<Utc>,
    /// Wall time spent, including retry delays
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Number of retries performed (attempts minus one)
    pub retries: u32,
    /// Last error, rendered with its full context chain
    pub error: Option<String>,
    /// Human-readable outcome
    pub message: String,
}

impl StepResult {
    pub(crate) fn started(step: &Step) -> Self {
        let now = Utc::now();
        Self {
            name: step.name.to_string(),
            component: step.component,
            status: StepStatus::Pending,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            retries: 0,
            error: None,
            message: String::new(),
        }
    }

    pub(crate) fn finish(
        mut self,
        status: StepStatus,
        message: impl Into<String>,
        error: Option<String>,
        elapsed: Duration,
    ) -> Self {
        self.status = status;
        self.message = message.into();
        self.error = error;
        self.end_time = Utc::now();
        self.duration = elapsed;
        self
    }
}

/// Outcome of a whole bootstrap run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// True iff no step failed
    pub success: bool,
    /// Results in registry order; stops at the first failure
    pub steps: Vec<StepResult>,
    /// When the run started
    pub start_time: DateTime<Utc>,
    /// When the run finished
    pub end_time: DateTime<Utc>,
    /// Total wall time
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Error of the failed step, if any
    pub error: Option<String>,
}

impl BootstrapResult {
    /// The step that stopped the run
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    /// Steps that completed successfully, in run order
    pub fn succeeded(&self) -> impl DoubleEndedIterator<Item = &StepResult> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Success)
    }

    /// Number of steps with the given status
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
