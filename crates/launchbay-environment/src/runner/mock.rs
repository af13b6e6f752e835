// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! A scriptable runner that simulates processes without touching the OS.
//! Tests drive the lifecycle of launched processes with [`MockRunner::emit`]
//! and [`MockRunner::exit`], and inspect what was asked of the runner.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use super::traits::*;

/// SIGTERM as reported by the mock on `stop`.
const SIGTERM: i32 = 15;

/// Mock runner for testing.
pub struct MockRunner {
    /// Senders for live (not yet exited) mock processes, keyed by process id.
    pub live: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ProcessEvent>>>>,
    /// Commands passed to `launch_detached`, in order.
    pub launched: Arc<Mutex<Vec<CommandSpec>>>,
    /// Commands passed to `run`, in order.
    pub ran: Arc<Mutex<Vec<CommandSpec>>>,
    /// Process ids passed to `stop`, in order.
    pub stopped: Arc<Mutex<Vec<String>>>,
    /// Next synthetic pid to hand out.
    pub next_pid: AtomicU32,
    /// If true, every `launch_detached` fails as if the binary were missing.
    pub fail_spawn: bool,
    /// `run` reports exit code 1 for commands whose display string contains any of these.
    pub failing_commands: Vec<String>,
    /// Line emitted on stdout right after launch.
    pub startup_output: Option<String>,
    /// Exit automatically with the given code after the delay.
    pub exit_after: Option<(Duration, i32)>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a mock runner whose processes stay silent until driven.
    pub fn new() -> Self {
        Self {
            live: Arc::new(Mutex::new(HashMap::new())),
            launched: Arc::new(Mutex::new(Vec::new())),
            ran: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
            next_pid: AtomicU32::new(10_000),
            fail_spawn: false,
            failing_commands: Vec::new(),
            startup_output: None,
            exit_after: None,
        }
    }

    /// Mock runner whose processes print a line as soon as they start.
    pub fn chatty() -> Self {
        Self {
            startup_output: Some("ready".to_string()),
            ..Self::new()
        }
    }

    /// Mock runner that cannot spawn anything.
    pub fn failing_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::new()
        }
    }

    /// Make `run` fail for commands containing `pattern`.
    pub fn with_failing_command(mut self, pattern: impl Into<String>) -> Self {
        self.failing_commands.push(pattern.into());
        self
    }

    /// Emit an output line for a live process.
    pub async fn emit(&self, handle_id: &str, stream: OutputStream, line: &str) {
        let live = self.live.lock().await;
        if let Some(tx) = live.get(handle_id) {
            let _ = tx.send(ProcessEvent::Output {
                stream,
                line: line.to_string(),
            });
        }
    }

    /// Make a live process exit with the given code.
    pub async fn exit(&self, handle_id: &str, code: i32) {
        let mut live = self.live.lock().await;
        if let Some(tx) = live.remove(handle_id) {
            let _ = tx.send(ProcessEvent::Exited {
                code: Some(code),
                signal: None,
            });
        }
    }

    /// Commands passed to `launch_detached`, in order.
    pub async fn launched(&self) -> Vec<CommandSpec> {
        self.launched.lock().await.clone()
    }

    /// Commands passed to `run`, in order.
    pub async fn ran(&self) -> Vec<CommandSpec> {
        self.ran.lock().await.clone()
    }

    /// Handle IDs that received a stop request.
    pub async fn stopped(&self) -> Vec<String> {
        self.stopped.lock().await.clone()
    }

    /// Number of processes that have not exited yet.
    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.ran.lock().await.push(spec.clone());

        let display = spec.display();
        let failing = self.failing_commands.iter().any(|p| display.contains(p));

        Ok(CommandOutput {
            exit_code: Some(if failing { 1 } else { 0 }),
            stdout: format!("mock: {}\n", display),
            stderr: if failing {
                format!("mock failure in {}\n", display)
            } else {
                String::new()
            },
            duration_ms: 0,
        })
    }

    async fn launch_detached(&self, spec: &CommandSpec) -> Result<LaunchedProcess> {
        self.launched.lock().await.push(spec.clone());

        if self.fail_spawn {
            return Err(RunnerError::SpawnFailed(format!(
                "{}: No such file or directory",
                spec.program
            )));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let handle = RunnerHandle {
            handle_id: format!("mock_{}", pid),
            pid: Some(pid),
            started_at: Utc::now(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(line) = &self.startup_output {
            let _ = tx.send(ProcessEvent::Output {
                stream: OutputStream::Stdout,
                line: line.clone(),
            });
        }
        self.live.lock().await.insert(handle.handle_id.clone(), tx);

        if let Some((delay, code)) = self.exit_after {
            let live = self.live.clone();
            let handle_id = handle.handle_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(tx) = live.lock().await.remove(&handle_id) {
                    let _ = tx.send(ProcessEvent::Exited {
                        code: Some(code),
                        signal: None,
                    });
                }
            });
        }

        Ok(LaunchedProcess { handle, events: rx })
    }

    async fn stop(&self, handle: &RunnerHandle) -> Result<()> {
        self.stopped.lock().await.push(handle.handle_id.clone());
        if let Some(tx) = self.live.lock().await.remove(&handle.handle_id) {
            let _ = tx.send(ProcessEvent::Exited {
                code: None,
                signal: Some(SIGTERM),
            });
        }
        Ok(())
    }
}
