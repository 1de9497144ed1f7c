//! External report regeneration.
//!
//! The report builder is an opaque child process. Whatever it does, the
//! caller gets a [`RegenerationOutcome`] back: spawn errors, non-zero exits
//! and timeouts are all reported as failures, never as errors that could end
//! the watch loop.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::AppError;
use crate::models::RegenerateConfig;

/// Maximum number of characters of child output echoed to the log.
const LOG_EXCERPT_CHARS: usize = 500;

/// Result of one regeneration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationOutcome {
    pub success: bool,
    /// Exit code, when the child exited on its own
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl RegenerationOutcome {
    fn failed(stderr: impl Into<String>, duration: Duration, timed_out: bool) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: stderr.into(),
            duration,
            timed_out,
        }
    }

    /// The failure as an error value, for reporting.
    pub fn error(&self) -> Option<AppError> {
        if self.success {
            return None;
        }
        let reason = if self.timed_out {
            format!("timed out after {:.1}s", self.duration.as_secs_f64())
        } else {
            match self.exit_code {
                Some(code) => format!("exited with status {code}"),
                None => excerpt(&self.stderr).to_string(),
            }
        };
        Some(AppError::external(reason))
    }

    /// Log the outcome the way an operator wants to read it.
    pub fn log(&self) {
        if self.success {
            log::info!(
                "Report regenerated in {:.2}s",
                self.duration.as_secs_f64()
            );
            let out = self.stdout.trim();
            if !out.is_empty() {
                log::debug!("Report builder output:\n{}", out);
            }
        } else {
            if let Some(e) = self.error() {
                log::error!("Report regeneration failed: {}", e);
            }
            let err = self.stderr.trim();
            if !err.is_empty() {
                log::error!("{}", excerpt(err));
            }
        }
    }
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(LOG_EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Something that can regenerate the report.
#[async_trait]
pub trait Regenerate: Send + Sync {
    async fn run(&self) -> RegenerationOutcome;
}

/// Runs the configured report-builder command.
#[derive(Debug, Clone)]
pub struct CommandRegenerator {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandRegenerator {
    pub fn new(config: &RegenerateConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout(),
        }
    }

    /// Resolve the working directory against `root`; when none is
    /// configured the child runs in `root` itself.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        self.working_dir = Some(match self.working_dir.take() {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        });
        self
    }

    /// Override the child timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl Regenerate for CommandRegenerator {
    async fn run(&self) -> RegenerationOutcome {
        let start = Instant::now();
        log::info!("Running report builder: {} {}", self.program, self.args.join(" "));

        let child = match self.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                return RegenerationOutcome::failed(
                    format!("failed to start '{}': {}", self.program, e),
                    start.elapsed(),
                    false,
                );
            }
        };

        // Dropping the child on timeout kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => RegenerationOutcome {
                success: output.status.success(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration: start.elapsed(),
                timed_out: false,
            },
            Ok(Err(e)) => RegenerationOutcome::failed(
                format!("failed to collect output: {e}"),
                start.elapsed(),
                false,
            ),
            Err(_) => RegenerationOutcome::failed(String::new(), start.elapsed(), true),
        }
    }
}
