use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::workflow::data::CommandReport;

/// Runs build and test commands inside the workspace with a wall-clock limit.
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a shell command, capturing exit status and output. A non-zero exit
    /// is reported, not an error; exceeding the timeout is an error.
    pub async fn run(&self, workspace_root: &Path, command: &str) -> Result<CommandReport> {
        tracing::info!(command = %command, dir = %workspace_root.display(), "Running command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workspace_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                AppError::Exec(format!(
                    "command timed out after {}s: {command}",
                    self.timeout.as_secs()
                ))
            })??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(CommandReport {
            command: command.to_string(),
            success: output.status.success(),
            exit_code: output.status.code(),
            output: truncate_output(combined),
        })
    }
}

const MAX_OUTPUT_BYTES: usize = 64 * 1024;

fn truncate_output(output: String) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output;
    }
    // Keep the tail; build and test failures show up at the end
    let cut = output.len() - MAX_OUTPUT_BYTES;
    let tail = &output[output
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= cut)
        .unwrap_or(0)..];
    format!("... (output truncated)\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> CommandRunner {
        CommandRunner::new(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn captures_output_and_exit_status() {
        let tmp = tempfile::tempdir().unwrap();
        let report = runner().run(tmp.path(), "echo built").await.unwrap();
        assert!(report.success);
        assert_eq!(report.exit_code, Some(0));
        assert!(report.output.contains("built"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let report = runner()
            .run(tmp.path(), "echo broken >&2; exit 3")
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(3));
        assert!(report.output.contains("broken"));
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_millis(100));
        let err = runner.run(tmp.path(), "sleep 5").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
