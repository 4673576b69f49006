//! Execution layer: run a built invocation and format its result for chat.
//! No shell is used; arguments are passed as a list to avoid injection.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

use crate::command::CommandInvocation;

/// Result of running one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    /// stdout followed by stderr (when non-empty).
    pub raw_output: Vec<u8>,
    /// Spawn error, exit status, or timeout. None on success.
    pub error_detail: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(raw_output: Vec<u8>) -> Self {
        Self {
            succeeded: true,
            raw_output,
            error_detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>, raw_output: Vec<u8>) -> Self {
        Self {
            succeeded: false,
            raw_output,
            error_detail: Some(detail.into()),
        }
    }
}

/// Runs invocations. The process implementation is `ProcessExecutor`; tests substitute spies.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, invocation: &CommandInvocation) -> ExecutionOutcome;
}

/// Spawns the executable directly with a hard timeout. A timed-out child is killed.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn combine_output(mut stdout: Vec<u8>, stderr: &[u8]) -> Vec<u8> {
    if !stderr.is_empty() {
        if !stdout.is_empty() && !stdout.ends_with(b"\n") {
            stdout.push(b'\n');
        }
        stdout.extend_from_slice(stderr);
    }
    stdout
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, invocation: &CommandInvocation) -> ExecutionOutcome {
        let child = tokio::process::Command::new(&invocation.executable)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return ExecutionOutcome::failure(format!("exec failed: {}", e), Vec::new()),
        };
        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionOutcome::failure(format!("wait failed: {}", e), Vec::new())
            }
            Err(_) => {
                return ExecutionOutcome::failure(
                    format!("timed out after {}s", self.timeout.as_secs_f32()),
                    Vec::new(),
                )
            }
        };
        let combined = combine_output(output.stdout, &output.stderr);
        if output.status.success() {
            ExecutionOutcome::success(combined)
        } else {
            ExecutionOutcome::failure(output.status.to_string(), combined)
        }
    }
}

const FENCE: &str = "```";

/// Drop blank lines and trailing whitespace; cut to `max_chars` with a marker.
fn tidy_output(raw: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    let joined = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if joined.chars().count() <= max_chars {
        return joined;
    }
    let mut cut: String = joined.chars().take(max_chars).collect();
    cut.push_str("\n... (output truncated)");
    cut
}

/// Turn an outcome into chat text.
///
/// Success with output becomes a code block; success without output yields no reply.
/// Failures always produce a reply so the requester knows the command ran and failed.
pub fn format_outcome(outcome: &ExecutionOutcome, max_chars: usize) -> Option<String> {
    let body = tidy_output(&outcome.raw_output, max_chars);
    if outcome.succeeded {
        if body.is_empty() {
            return None;
        }
        return Some(format!("{}\n{}\n{}", FENCE, body, FENCE));
    }
    let detail = outcome.error_detail.as_deref().unwrap_or("unknown error");
    if body.is_empty() {
        Some(format!("command failed: {}", detail))
    } else {
        Some(format!(
            "command failed: {}\n{}\n{}\n{}",
            detail, FENCE, body, FENCE
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(executable: &str, args: &[&str]) -> CommandInvocation {
        CommandInvocation {
            executable: executable.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn success_output_is_fenced_and_blank_lines_collapsed() {
        let outcome = ExecutionOutcome::success(b"NAME   READY\n\n\npod-a  1/1\n".to_vec());
        assert_eq!(
            format_outcome(&outcome, 1000).as_deref(),
            Some("```\nNAME   READY\npod-a  1/1\n```")
        );
    }

    #[test]
    fn blank_success_yields_no_reply() {
        let outcome = ExecutionOutcome::success(b"\n  \n".to_vec());
        assert_eq!(format_outcome(&outcome, 1000), None);
    }

    #[test]
    fn failure_yields_distinct_reply() {
        let outcome = ExecutionOutcome::failure("exit status: 1", b"Error from server (NotFound)\n".to_vec());
        let reply = format_outcome(&outcome, 1000).unwrap();
        assert!(reply.starts_with("command failed: exit status: 1"));
        assert!(reply.contains("Error from server (NotFound)"));
    }

    #[test]
    fn long_output_is_truncated() {
        let outcome = ExecutionOutcome::success("x".repeat(50).into_bytes());
        let reply = format_outcome(&outcome, 10).unwrap();
        assert!(reply.contains(&"x".repeat(10)));
        assert!(!reply.contains(&"x".repeat(11)));
        assert!(reply.contains("(output truncated)"));
    }

    #[tokio::test]
    async fn process_executor_captures_stdout() {
        let exec = ProcessExecutor::new(Duration::from_secs(5));
        let outcome = exec.run(&invocation("echo", &["hello", "$(id)"])).await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.raw_output, b"hello $(id)\n".to_vec());
    }

    #[tokio::test]
    async fn process_executor_reports_non_zero_exit() {
        let exec = ProcessExecutor::new(Duration::from_secs(5));
        let outcome = exec.run(&invocation("false", &[])).await;
        assert!(!outcome.succeeded);
        assert!(outcome.error_detail.unwrap().starts_with("exit"));
    }

    #[tokio::test]
    async fn process_executor_reports_spawn_failure() {
        let exec = ProcessExecutor::new(Duration::from_secs(5));
        let outcome = exec.run(&invocation("/nonexistent/kubectl-binary", &[])).await;
        assert!(!outcome.succeeded);
        assert!(outcome.error_detail.unwrap().starts_with("exec failed"));
    }

    #[tokio::test]
    async fn process_executor_times_out() {
        let exec = ProcessExecutor::new(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let outcome = exec.run(&invocation("sleep", &["10"])).await;
        assert!(!outcome.succeeded);
        assert!(outcome.error_detail.unwrap().starts_with("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
