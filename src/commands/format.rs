//! Terminal rendering for progress lines and reports

use std::time::Duration;

use crate::bootstrap::{BootstrapResult, RollbackReport, StepResult, StepStatus};
use crate::validate::DiagnosticResult;

/// Icon for a step status
pub fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Success => "✓",
        StepStatus::Failed => "✗",
        StepStatus::Skipped => "-",
        StepStatus::Pending | StepStatus::Running | StepStatus::Retrying => "…",
    }
}

/// Format a duration compactly (e.g. "850ms", "12s", "4m12s", "1h3m")
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs == 0 {
        return format!("{}ms", duration.as_millis());
    }

    let hours = total_secs / 3600;
    if hours > 0 {
        return format!("{}h{}m", hours, (total_secs % 3600) / 60);
    }

    let minutes = total_secs / 60;
    if minutes > 0 {
        return format!("{}m{}s", minutes, total_secs % 60);
    }

    format!("{}s", total_secs)
}

/// One live progress line for a completed step
pub fn step_line(step: &StepResult) -> String {
    let mut line = format!(
        "  {} {:<26} {:<8} {}",
        status_icon(step.status),
        step.name,
        step.status,
        format_duration(step.duration)
    );
    if step.retries > 0 {
        let plural = if step.retries == 1 { "retry" } else { "retries" };
        line.push_str(&format!(" ({} {})", step.retries, plural));
    }
    line
}

/// Closing summary of a bootstrap run
pub fn bootstrap_summary(result: &BootstrapResult) -> String {
    if result.success {
        format!(
            "Bootstrap complete in {}: {} succeeded, {} skipped",
            format_duration(result.duration),
            result.count(StepStatus::Success),
            result.count(StepStatus::Skipped)
        )
    } else {
        format!(
            "Bootstrap failed after {}",
            format_duration(result.duration)
        )
    }
}

/// Lines describing a rollback
pub fn rollback_lines(report: &RollbackReport) -> Vec<String> {
    let mut lines = Vec::new();
    for step in &report.torn_down {
        lines.push(format!("  ✓ rolled back {}", step));
    }
    for failure in &report.failures {
        lines.push(format!(
            "  ✗ could not roll back {}: {}",
            failure.step, failure.error
        ));
    }
    if lines.is_empty() {
        lines.push("  nothing to roll back".to_string());
    }
    lines
}

/// Diagnostics grouped by category with remediation under failing checks
pub fn diagnostics_report(result: &DiagnosticResult) -> String {
    let mut out = String::new();
    for (category, checks) in result.by_category() {
        out.push_str(&format!("{}\n", category));
        let width = checks.iter().map(|c| c.name.len()).max().unwrap_or(0);
        for check in checks {
            let icon = if check.passed { "✓" } else { "✗" };
            out.push_str(&format!(
                "  {} {:<width$}  {}\n",
                icon,
                check.name,
                check.message,
                width = width
            ));
            if let Some(error) = &check.error {
                out.push_str(&format!("      error: {}\n", error));
            }
            if !check.passed {
                if let Some(remediation) = &check.remediation {
                    out.push_str(&format!("      fix:   {}\n", remediation));
                }
            }
        }
    }
    let total = result.checks.len();
    out.push_str(&format!(
        "\n{} of {} checks passed\n",
        total - result.failed_count,
        total
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::bootstrap::RollbackFailure;
    use crate::component::ComponentId;
    use crate::validate::{CheckCategory, DiagnosticCheck};

    fn step(status: StepStatus, retries: u32, duration: Duration) -> StepResult {
        let now = Utc::now();
        StepResult {
            name: "install-cert-manager".to_string(),
            component: ComponentId::CertManager,
            status,
            start_time: now,
            end_time: now,
            duration,
            retries,
            error: None,
            message: String::new(),
        }
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(252)), "4m12s");
        assert_eq!(format_duration(Duration::from_secs(3780)), "1h3m");
    }

    #[test]
    fn step_line_shows_icon_and_retries() {
        let line = step_line(&step(StepStatus::Success, 2, Duration::from_secs(75)));
        assert!(line.starts_with("  ✓ install-cert-manager"));
        assert!(line.contains("success"));
        assert!(line.contains("1m15s"));
        assert!(line.ends_with("(2 retries)"));

        let line = step_line(&step(StepStatus::Skipped, 0, Duration::ZERO));
        assert!(line.starts_with("  - "));
        assert!(!line.contains("retr"));
    }

    #[test]
    fn rollback_lines_list_failures() {
        let report = RollbackReport {
            torn_down: vec!["provision-infrastructure".to_string()],
            failures: vec![RollbackFailure {
                step: "install-ingress".to_string(),
                component: ComponentId::Ingress,
                error: "helm unreachable".to_string(),
            }],
        };
        let lines = rollback_lines(&report);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("install-ingress: helm unreachable"));
        assert_eq!(
            rollback_lines(&RollbackReport::default()),
            vec!["  nothing to roll back"]
        );
    }

    #[test]
    fn diagnostics_report_groups_and_explains() {
        let result = DiagnosticResult::from_checks(vec![
            DiagnosticCheck::pass("Kubernetes API connectivity", CheckCategory::Connectivity, "ok"),
            DiagnosticCheck::fail(
                "Namespace cert-manager",
                CheckCategory::CertManager,
                "Namespace cert-manager not found",
                "re-run the bootstrap",
            ),
        ]);

        let report = diagnostics_report(&result);
        assert!(report.starts_with("Connectivity\n"));
        assert!(report.contains("cert-manager\n  ✗ Namespace cert-manager"));
        assert!(report.contains("fix:   re-run the bootstrap"));
        assert!(report.ends_with("1 of 2 checks passed\n"));
    }
}
