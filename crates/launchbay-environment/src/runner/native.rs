// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native process runner.
//!
//! Spawns commands directly on the host with `tokio::process`. Every detached
//! child becomes the leader of its own process group, so a termination signal
//! also reaches whatever the dev server forks (bundlers, watchers, ...).

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::traits::*;

/// Runner that executes commands as host processes.
#[derive(Debug, Default)]
pub struct NativeRunner;

impl NativeRunner {
    /// Create a new native runner.
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Result<Command> {
        if !spec.working_dir.is_dir() {
            return Err(RunnerError::WorkingDirNotFound(
                spec.working_dir.display().to_string(),
            ));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> RunnerError {
    RunnerError::SpawnFailed(format!("{}: {}", spec.program, e))
}

/// Forward every line from `reader` as an output event.
async fn pump_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(ProcessEvent::Output { stream, line }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(stream = stream.as_str(), error = %e, "Output stream closed with error");
                break;
            }
        }
    }
}

fn exit_event(status: &ExitStatus) -> ProcessEvent {
    ProcessEvent::Exited {
        code: status.code(),
        signal: status.signal(),
    }
}

#[async_trait]
impl Runner for NativeRunner {
    fn runner_type(&self) -> &'static str {
        "native"
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        let mut cmd = Self::command(spec)?;

        debug!(command = %spec.display(), dir = %spec.working_dir.display(), "Running command");

        let output = cmd.output().await.map_err(|e| spawn_error(spec, e))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn launch_detached(&self, spec: &CommandSpec) -> Result<LaunchedProcess> {
        let mut cmd = Self::command(spec)?;
        cmd.process_group(0).kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|e| spawn_error(spec, e))?;
        let pid = child.id();
        let started_at = chrono::Utc::now();

        let (tx, rx) = mpsc::unbounded_channel();

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump_lines(out, OutputStream::Stdout, tx.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump_lines(err, OutputStream::Stderr, tx.clone())));

        tokio::spawn(async move {
            let status = child.wait().await;

            // Drain output before announcing the exit.
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                let _ = task.await;
            }

            let event = match status {
                Ok(status) => exit_event(&status),
                Err(e) => {
                    warn!(pid = ?pid, error = %e, "Failed to wait for child process");
                    ProcessEvent::Exited {
                        code: None,
                        signal: None,
                    }
                }
            };
            let _ = tx.send(event);
        });

        info!(pid = ?pid, command = %spec.display(), dir = %spec.working_dir.display(), "Launched process (detached)");

        Ok(LaunchedProcess {
            handle: RunnerHandle {
                handle_id: pid
                    .map(|p| format!("pid_{}", p))
                    .unwrap_or_else(|| format!("native_{}", uuid::Uuid::new_v4())),
                pid,
                started_at,
            },
            events: rx,
        })
    }

    async fn stop(&self, handle: &RunnerHandle) -> Result<()> {
        let Some(pid) = handle.pid else {
            return Ok(());
        };

        match signal::killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                info!(pid, "Sent SIGTERM to process group");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!(pid, "Process group already gone");
                Ok(())
            }
            Err(e) => Err(RunnerError::Signal(format!("SIGTERM to group {}: {}", pid, e))),
        }
    }
}
