//! Subprocess invocation behind a narrow, mockable interface.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished (or killed) child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn exited(code: i32, stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, waiting at most `timeout` before killing it.
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput>;
}

/// Runs processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    #[tracing::instrument(skip(self, args))]
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        debug!("Running {:?} {:?}", program, args);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {:?}", program))?;

        let wait = child.wait_with_output();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(output) => output,
                Err(_) => {
                    // Dropping the future drops the child, which kills it.
                    warn!("{:?} did not exit within {:?}, killed", program, limit);
                    return Ok(ProcessOutput {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("timed out after {:?}", limit),
                    });
                }
            },
            None => wait.await,
        }
        .with_context(|| format!("Failed to wait for {:?}", program))?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
