//! Step descriptors and the fixed registry

use crate::component::ComponentId;
use crate::Config;

/// One entry in the bootstrap sequence.
///
/// A step names the component it installs; executing it calls that
/// component's `install`, and `health_check` gates success when set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    /// Step name shown in progress output
    pub name: &'static str,
    /// Component installed by this step
    pub component: ComponentId,
    /// Skip without calling anything
    pub skip: bool,
    /// Run the component's health check after a successful install
    pub health_check: bool,
}

impl Step {
    /// A step that installs `component` and health-checks it
    pub const fn new(name: &'static str, component: ComponentId) -> Self {
        Self {
            name,
            component,
            skip: false,
            health_check: true,
        }
    }

    /// Drop the post-install health check
    pub const fn without_health_check(mut self) -> Self {
        self.health_check = false;
        self
    }

    /// Set the skip flag
    pub const fn skipped(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }
}

/// Ordered, immutable list of steps for a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRegistry {
    steps: Vec<Step>,
}

impl StepRegistry {
    /// Registry over an explicit step list
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// The standard bootstrap sequence with skip flags from `config`
    pub fn from_config(config: &Config) -> Self {
        let steps = [
            Step::new("provision-infrastructure", ComponentId::Infrastructure),
            Step::new("install-ingress", ComponentId::Ingress),
            Step::new("install-cert-manager", ComponentId::CertManager),
            Step::new("install-external-dns", ComponentId::ExternalDns),
            Step::new("validate-deployment", ComponentId::Validation).without_health_check(),
        ]
        .into_iter()
        .map(|step| {
            let skip = config.skip.is_skipped(step.component);
            step.skipped(skip)
        })
        .collect();
        Self { steps }
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the registry has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
