//! External command execution
//!
//! Terraform and Helm are driven as child processes. Each call carries its own
//! deadline; the orchestrator never imposes one. Children are killed when their
//! future is dropped, which is how cancellation reaches an in-flight call.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Largest amount of stderr kept in an error message
const MAX_STDERR_BYTES: usize = 4096;

/// A command line to run
#[derive(Clone, Debug)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<std::path::PathBuf>,
    env: Vec<(String, String)>,
    quiet: bool,
}

impl CommandSpec {
    /// Create a command for `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            quiet: false,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in the given working directory
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Do not log stdout. For commands that print secrets, such as
    /// `terraform output`.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Whether stdout is kept out of the logs
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Command line for logs and error messages. `--set` values are elided.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        let mut redact_next = false;
        for arg in &self.args {
            if redact_next {
                let key = arg.split('=').next().unwrap_or_default();
                parts.push(format!("{}=…", key));
                redact_next = false;
            } else {
                redact_next = arg == "--set";
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }

    /// The first two words, used as the operation name
    pub fn short_name(&self) -> String {
        match self.args.first() {
            Some(sub) => format!("{} {}", self.program, sub),
            None => self.program.clone(),
        }
    }
}

/// Run a command to completion within `timeout`, returning its stdout.
///
/// Stdout lines are logged at debug level as they arrive, unless the spec is
/// [quiet](CommandSpec::quiet). A non-zero exit
/// becomes [`Error::Command`] carrying (truncated) stderr.
pub async fn run(spec: &CommandSpec, timeout: Duration) -> Result<String> {
    let operation = spec.display();
    debug!(command = %operation, "Running command");

    match tokio::time::timeout(timeout, run_to_completion(spec)).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(spec.short_name(), timeout)),
    }
}

async fn run_to_completion(spec: &CommandSpec) -> Result<String> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .map_err(|e| Error::command(spec.short_name(), format!("failed to start: {}", e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = async {
        let mut collected = String::new();
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if !spec.quiet {
                    debug!(program = %spec.program, "{}", line);
                }
                collected.push_str(&line);
                collected.push('\n');
            }
        }
        Ok::<_, std::io::Error>(collected)
    };

    let stderr_task = async {
        let mut collected = String::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_string(&mut collected).await?;
        }
        Ok::<_, std::io::Error>(collected)
    };

    let (stdout, stderr) = tokio::try_join!(stdout_task, stderr_task)?;
    let status = child.wait().await?;

    if !status.success() {
        return Err(Error::command(spec.short_name(), truncate(stderr.trim(), status)));
    }

    Ok(stdout)
}

fn truncate(stderr: &str, status: std::process::ExitStatus) -> String {
    if stderr.is_empty() {
        return format!("exited with {}", status);
    }
    if stderr.len() <= MAX_STDERR_BYTES {
        return stderr.to_string();
    }
    let mut cut = stderr.len() - MAX_STDERR_BYTES;
    while !stderr.is_char_boundary(cut) {
        cut += 1;
    }
    format!("…{}", &stderr[cut..])
}

/// Check whether a tool is available on `PATH`
pub async fn tool_available(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_is_logged_unless_quiet() {
        let spec = CommandSpec::new("terraform").arg("apply");
        assert!(!spec.is_quiet());
        assert!(spec.clone().quiet().is_quiet());
        // builders keep the flag
        assert!(CommandSpec::new("terraform").quiet().arg("output").is_quiet());
    }

    #[test]
    fn display_elides_set_values() {
        let spec = CommandSpec::new("helm")
            .args(["upgrade", "--install", "external-dns"])
            .args(["--set", "env[0].value=token"]);
        assert_eq!(
            spec.display(),
            "helm upgrade --install external-dns --set env[0].value=…"
        );
    }

    #[test]
    fn short_name_uses_subcommand() {
        let spec = CommandSpec::new("terraform").args(["apply", "-auto-approve"]);
        assert_eq!(spec.short_name(), "terraform apply");
        assert_eq!(CommandSpec::new("helm").short_name(), "helm");
    }

    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let spec = CommandSpec::new("sh").args(["-c", "echo first; echo second"]);
        let out = run(&spec, Duration::from_secs(10)).await.unwrap();
        assert_eq!(out, "first\nsecond\n");
    }

    #[tokio::test]
    async fn failing_command_captures_stderr() {
        let spec = CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = run(&spec, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let spec = CommandSpec::new("sleep").arg("5");
        let err = run(&spec, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_command_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz");
        let err = run(&spec, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[test]
    fn long_stderr_keeps_the_tail() {
        let long = "x".repeat(MAX_STDERR_BYTES + 10) + "END";
        let status = std::process::Command::new("true").status().unwrap();
        let message = truncate(&long, status);
        assert!(message.starts_with('…'));
        assert!(message.ends_with("END"));
    }
}
