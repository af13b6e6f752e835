// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the abstract interface for process runners.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Working directory does not exist.
    #[error("Working directory not found: {0}")]
    WorkingDirNotFound(String),

    /// The OS refused to create the process.
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    /// Delivering a signal to the process failed.
    #[error("Signal delivery failed: {0}")]
    Signal(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Explicit description of a child process. Never interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name (resolved via PATH) or path.
    pub program: String,
    /// Argument list, passed verbatim.
    pub args: Vec<String>,
    /// Directory the process runs in.
    pub working_dir: PathBuf,
    /// Variables added on top of the inherited environment.
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Create a spec with no extra environment.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Lowercase stream name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Lifecycle event of a detached process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line of output.
    Output {
        /// Stream the line was read from.
        stream: OutputStream,
        /// Line content without the trailing newline.
        line: String,
    },
    /// The process is gone. Always the last event.
    Exited {
        /// Exit code if the process exited normally.
        code: Option<i32>,
        /// Terminating signal number if it was killed.
        signal: Option<i32>,
    },
}

/// Handle for a launched process (detached execution).
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    /// Unique identifier for this launch (PID for native, synthetic for mock)
    pub handle_id: String,
    /// OS process ID, also the process group ID for native launches.
    pub pid: Option<u32>,
    /// When the process was started
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// A freshly launched process and the stream of its events.
#[derive(Debug)]
pub struct LaunchedProcess {
    /// Handle used to stop the process.
    pub handle: RunnerHandle,
    /// Output lines followed by exactly one `Exited` event.
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Result of a synchronous command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `max_lines` lines of stderr, capped at `max_bytes`.
    pub fn stderr_tail(&self, max_lines: usize, max_bytes: usize) -> String {
        tail(&self.stderr, max_lines, max_bytes)
    }
}

/// Last `max_lines` non-empty lines of `text`, capped at `max_bytes` (keeping the end).
pub fn tail(text: &str, max_lines: usize, max_bytes: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let joined = lines[lines.len().saturating_sub(max_lines)..].join("\n");
    if joined.len() <= max_bytes {
        return joined;
    }
    let mut cut = joined.len() - max_bytes;
    while !joined.is_char_boundary(cut) {
        cut += 1;
    }
    format!("...{}", &joined[cut..])
}

/// Trait for process runners.
///
/// Runners are PURE execution engines - they do NOT touch the registry or
/// any database. Bookkeeping is handled by the caller.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type identifier (e.g., "native", "mock")
    fn runner_type(&self) -> &'static str;

    /// Run a command to completion, capturing its output.
    ///
    /// A non-zero exit is reported in [`CommandOutput::exit_code`], not as an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Launch a process without waiting for it (fire-and-forget).
    ///
    /// Returns as soon as the OS process exists.
    async fn launch_detached(&self, spec: &CommandSpec) -> Result<LaunchedProcess>;

    /// Ask a process to terminate gracefully. Does not wait for exit.
    ///
    /// A process that is already gone is not an error.
    async fn stop(&self, handle: &RunnerHandle) -> Result<()>;
}
