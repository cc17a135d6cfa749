//! Subprocess execution with captured output.

use std::process::Stdio;
use tokio::process::Command;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub(crate) struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CapturedOutput {
    /// One-line failure description for error payloads.
    pub fn failure_summary(&self) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        format!("exit code {}: {}", self.exit_code, detail)
    }
}

/// Run a command to completion, capturing stdout and stderr.
pub(crate) async fn run_capture(mut cmd: Command) -> std::io::Result<CapturedOutput> {
    let child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
    let output = child.wait_with_output().await?;

    Ok(CapturedOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_capture_success() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_capture(cmd).await.expect("spawn echo");
        assert!(out.success);
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_capture_failure() {
        let out = run_capture(Command::new("false")).await.expect("spawn false");
        assert!(!out.success);
        assert_ne!(out.exit_code, 0);
    }

    #[test]
    fn test_failure_summary_prefers_stderr() {
        let out = CapturedOutput {
            exit_code: 2,
            stdout: "ignored".to_string(),
            stderr: "boom\n".to_string(),
            success: false,
        };
        assert_eq!(out.failure_summary(), "exit code 2: boom");
    }

    #[test]
    fn test_failure_summary_falls_back_to_stdout() {
        let out = CapturedOutput {
            exit_code: 1,
            stdout: "only stdout here\n".to_string(),
            stderr: "  ".to_string(),
            success: false,
        };
        assert_eq!(out.failure_summary(), "exit code 1: only stdout here");
    }
}
