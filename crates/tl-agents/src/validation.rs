//! Validation command execution for auto-review.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tl_telemetry::metrics::{global_metrics, VALIDATION_DURATION};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("failed to spawn validation command: {0}")]
    Spawn(String),
    #[error("validation command timed out after {0}s")]
    Timeout(u64),
    #[error("working directory {0} does not exist")]
    MissingDir(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (false, false) => format!("{stdout}\n{stderr}"),
            (false, true) => stdout.to_string(),
            (true, _) => stderr.to_string(),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, ValidationError>;
}

/// Runs commands through `sh -c`. The child is killed when the timeout
/// drops its future.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellCommandRunner;

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, ValidationError> {
        if !cwd.is_dir() {
            return Err(ValidationError::MissingDir(cwd.display().to_string()));
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let started = Instant::now();
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| ValidationError::Timeout(timeout.as_secs()))?
            .map_err(|e| ValidationError::Spawn(e.to_string()))?;
        let elapsed = started.elapsed();
        global_metrics().record_duration(VALIDATION_DURATION, elapsed);

        debug!(
            command,
            cwd = %cwd.display(),
            status = ?output.status.code(),
            elapsed_ms = elapsed.as_millis() as u64,
            "validation command finished"
        );

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}
