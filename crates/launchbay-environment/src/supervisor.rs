// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process supervisor.
//!
//! Owns the registry of live project processes, at most one per
//! `(project_id, mode)`. Each process moves through
//! `starting -> running -> {stopped, error}`:
//!
//! - `starting` is set as soon as the OS process exists.
//! - `running` is set on the first line of output. This is a best-effort
//!   liveness signal, not a health check.
//! - `stopped` on exit code 0, `error` on any other exit, a signal, or a
//!   failed spawn.
//!
//! Terminal states remove the record, release its port and reset the
//! project's status to idle. A production process that exits on its own
//! also has its terminal status written to the deployment store. Every
//! registry entry carries a generation so a late exit of a replaced process
//! never touches its successor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::ports::PortAllocator;
use crate::runner::{CommandSpec, OutputStream, ProcessEvent, Runner, RunnerHandle};
use crate::store::{DeploymentStore, PROJECT_STATUS_IDLE, ProjectStore};

/// Log target for child process output.
pub const PROCESS_LOG_TARGET: &str = "launchbay::process";

/// Which kind of instance a process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Development server.
    Preview,
    /// Built production server.
    Production,
}

impl Mode {
    /// Lowercase mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Preview => "preview",
            Mode::Production => "production",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Spawned, no output seen yet.
    Starting,
    /// Produced output at least once.
    Running,
    /// Exited with code 0.
    Stopped,
    /// Failed to spawn, exited non-zero or was killed.
    Error,
}

impl ProcessStatus {
    /// Lowercase status name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Error => "error",
        }
    }

    /// Whether the status is final for its record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Error)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a supervised process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// Owning project.
    pub project_id: String,
    /// Preview or production.
    pub mode: Mode,
    /// Runner handle; absent when the spawn failed.
    #[serde(skip)]
    pub handle: Option<RunnerHandle>,
    /// Port injected as `PORT`.
    pub port: u16,
    /// Internal URL of the process.
    pub url: String,
    /// Status at the time of the snapshot.
    pub status: ProcessStatus,
    /// When the record was created.
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    status_rx: Option<watch::Receiver<ProcessStatus>>,
}

impl ProcessRecord {
    /// Wait at most `timeout` for the status to leave `starting`.
    ///
    /// Returns the status observed when the wait ends; still `starting` on
    /// timeout.
    pub async fn wait_for_transition(&self, timeout: Duration) -> ProcessStatus {
        let Some(mut rx) = self.status_rx.clone() else {
            return self.status;
        };
        let observed = match tokio::time::timeout(
            timeout,
            rx.wait_for(|s| *s != ProcessStatus::Starting),
        )
        .await
        {
            Ok(Ok(status)) => Some(*status),
            _ => None,
        };
        observed.unwrap_or_else(|| *rx.borrow())
    }

    /// Latest status of the process behind this snapshot, including the
    /// terminal status once it has exited.
    pub fn current_status(&self) -> ProcessStatus {
        match &self.status_rx {
            Some(rx) => *rx.borrow(),
            None => self.status,
        }
    }
}

type Key = (String, Mode);

struct Entry {
    generation: u64,
    record: ProcessRecord,
    status_tx: watch::Sender<ProcessStatus>,
}

impl Entry {
    fn snapshot(&self) -> ProcessRecord {
        let mut record = self.record.clone();
        record.status = *self.status_tx.borrow();
        record
    }
}

/// In-memory table of live processes keyed by `(project_id, mode)`.
///
/// Only the supervisor mutates it; readers get snapshots.
#[derive(Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<Key, Entry>>,
    key_locks: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
}

impl fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("live", &self.len())
            .finish()
    }
}

impl ProcessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the record for a key.
    pub fn get(&self, project_id: &str, mode: Mode) -> Option<ProcessRecord> {
        self.entries()
            .get(&(project_id.to_string(), mode))
            .map(Entry::snapshot)
    }

    /// Snapshots of every live record.
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        self.entries().values().map(Entry::snapshot).collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no record is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key_locks(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Arc<tokio::sync::Mutex<()>>>> {
        self.key_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key_lock(&self, key: &Key) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks().entry(key.clone()).or_default().clone()
    }

    /// Drop the lock for `key` once nobody but the map and the caller holds it.
    fn prune_key_lock(&self, key: &Key, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.key_locks();
        let unused = locks
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if unused {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn key_lock_count(&self) -> usize {
        self.key_locks().len()
    }

    fn insert(&self, key: Key, mut record: ProcessRecord) -> (u64, ProcessRecord) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (status_tx, status_rx) = watch::channel(record.status);
        record.status_rx = Some(status_rx);
        let snapshot = record.clone();
        self.entries().insert(
            key,
            Entry {
                generation,
                record,
                status_tx,
            },
        );
        (generation, snapshot)
    }

    fn remove(&self, key: &Key) -> Option<ProcessRecord> {
        self.entries().remove(key).map(|e| e.snapshot())
    }

    /// Remove the entry only if it is still the given generation.
    fn remove_generation(
        &self,
        key: &Key,
        generation: u64,
        status: ProcessStatus,
    ) -> Option<ProcessRecord> {
        let mut entries = self.entries();
        if entries.get(key).map(|e| e.generation) != Some(generation) {
            return None;
        }
        let entry = entries.remove(key)?;
        entry.status_tx.send_replace(status);
        Some(entry.snapshot())
    }

    fn mark_running(&self, key: &Key, generation: u64) -> bool {
        let entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.generation == generation => {
                entry.status_tx.send_if_modified(|s| {
                    if *s == ProcessStatus::Starting {
                        *s = ProcessStatus::Running;
                        true
                    } else {
                        false
                    }
                })
            }
            _ => false,
        }
    }

    fn has_newer(&self, key: &Key, generation: u64) -> bool {
        self.entries()
            .get(key)
            .is_some_and(|e| e.generation > generation)
    }
}

/// Starts, observes and stops project processes.
pub struct ProcessSupervisor {
    registry: Arc<ProcessRegistry>,
    runner: Arc<dyn Runner>,
    ports: Arc<PortAllocator>,
    projects: Arc<dyn ProjectStore>,
    deployments: Option<Arc<dyn DeploymentStore>>,
    preview_host: String,
}

impl ProcessSupervisor {
    /// Create a supervisor with its own empty registry.
    pub fn new(
        runner: Arc<dyn Runner>,
        ports: Arc<PortAllocator>,
        projects: Arc<dyn ProjectStore>,
    ) -> Self {
        Self {
            registry: Arc::new(ProcessRegistry::new()),
            runner,
            ports,
            projects,
            deployments: None,
            preview_host: "localhost".to_string(),
        }
    }

    /// Persist the terminal status of production processes that exit on
    /// their own.
    pub fn with_deployment_store(mut self, deployments: Arc<dyn DeploymentStore>) -> Self {
        self.deployments = Some(deployments);
        self
    }

    /// Use an externally owned registry.
    pub fn with_registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Host used in process URLs.
    pub fn with_preview_host(mut self, host: impl Into<String>) -> Self {
        self.preview_host = host.into();
        self
    }

    /// The registry this supervisor mutates.
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// The port allocator processes draw from.
    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    fn url_for(&self, port: u16) -> String {
        format!("http://{}:{}", self.preview_host, port)
    }

    /// Start a process for `(project_id, mode)`, replacing any live one.
    ///
    /// The allocated port is injected as `PORT`. Returns as soon as the OS
    /// process exists, with status `starting`. A failed spawn is not an
    /// `Err`: the returned record has status `error` and is not registered.
    /// Port exhaustion is an `Err`.
    pub async fn start(
        &self,
        project_id: &str,
        mode: Mode,
        spec: CommandSpec,
    ) -> Result<ProcessRecord> {
        let key: Key = (project_id.to_string(), mode);
        let lock = self.registry.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(key.clone(), spec).await
        };
        self.registry.prune_key_lock(&key, lock);
        result
    }

    async fn start_locked(&self, key: Key, spec: CommandSpec) -> Result<ProcessRecord> {
        let (project_id, mode) = (key.0.as_str(), key.1);

        if let Some(previous) = self.registry.remove(&key) {
            info!(
                project_id = %project_id,
                mode = %mode,
                port = previous.port,
                "Replacing live process"
            );
            self.terminate(&previous).await;
            self.ports.release(previous.port);
        }

        let port = self.ports.allocate()?;
        let spec = spec.with_env("PORT", port.to_string());
        let url = self.url_for(port);

        let launched = match self.runner.launch_detached(&spec).await {
            Ok(launched) => launched,
            Err(e) => {
                error!(
                    project_id = %project_id,
                    mode = %mode,
                    command = %spec.display(),
                    error = %e,
                    "Failed to spawn process"
                );
                self.ports.release(port);
                self.reset_project_status_later(project_id);
                return Ok(ProcessRecord {
                    project_id: project_id.to_string(),
                    mode,
                    handle: None,
                    port,
                    url,
                    status: ProcessStatus::Error,
                    started_at: Utc::now(),
                    status_rx: None,
                });
            }
        };

        let record = ProcessRecord {
            project_id: project_id.to_string(),
            mode,
            handle: Some(launched.handle.clone()),
            port,
            url,
            status: ProcessStatus::Starting,
            started_at: launched.handle.started_at,
            status_rx: None,
        };
        let (generation, record) = self.registry.insert(key.clone(), record);

        info!(
            project_id = %project_id,
            mode = %mode,
            port = port,
            pid = ?launched.handle.pid,
            command = %spec.display(),
            "Process started"
        );

        tokio::spawn(pump_events(
            PumpContext {
                key,
                generation,
                registry: self.registry.clone(),
                ports: self.ports.clone(),
                projects: self.projects.clone(),
                deployments: self.deployments.clone(),
            },
            launched.events,
        ));

        Ok(record)
    }

    /// Current record for `(project_id, mode)`. Never blocks on the process.
    pub fn status(&self, project_id: &str, mode: Mode) -> Option<ProcessRecord> {
        self.registry.get(project_id, mode)
    }

    /// Send a graceful stop and remove the record.
    ///
    /// Returns the last known record, or `None` if nothing was running.
    /// Does not wait for the process to exit.
    pub async fn stop(&self, project_id: &str, mode: Mode) -> Option<ProcessRecord> {
        let key: Key = (project_id.to_string(), mode);
        let lock = self.registry.key_lock(&key);
        let record = {
            let _guard = lock.lock().await;
            self.stop_locked(&key).await
        };
        self.registry.prune_key_lock(&key, lock);
        record
    }

    async fn stop_locked(&self, key: &Key) -> Option<ProcessRecord> {
        let record = self.registry.remove(key)?;
        self.terminate(&record).await;
        self.ports.release(record.port);

        info!(
            project_id = %record.project_id,
            mode = %record.mode,
            port = record.port,
            "Process stopped"
        );
        Some(record)
    }

    /// Stop every live process.
    pub async fn stop_all(&self) -> usize {
        let live = self.registry.snapshot();
        let mut stopped = 0;
        for record in live {
            if self.stop(&record.project_id, record.mode).await.is_some() {
                stopped += 1;
            }
        }
        stopped
    }

    async fn terminate(&self, record: &ProcessRecord) {
        let Some(handle) = &record.handle else {
            return;
        };
        if let Err(e) = self.runner.stop(handle).await {
            warn!(
                project_id = %record.project_id,
                mode = %record.mode,
                handle_id = %handle.handle_id,
                error = %e,
                "Failed to signal process"
            );
        }
    }

    fn reset_project_status_later(&self, project_id: &str) {
        let projects = self.projects.clone();
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            reset_project_status(projects.as_ref(), &project_id).await;
        });
    }
}

async fn reset_project_status(projects: &dyn ProjectStore, project_id: &str) {
    if let Err(e) = projects
        .update_project_status(project_id, PROJECT_STATUS_IDLE)
        .await
    {
        warn!(project_id = %project_id, error = %e, "Failed to reset project status");
    }
}

struct PumpContext {
    key: Key,
    generation: u64,
    registry: Arc<ProcessRegistry>,
    ports: Arc<PortAllocator>,
    projects: Arc<dyn ProjectStore>,
    deployments: Option<Arc<dyn DeploymentStore>>,
}

/// Route output to the log and apply status transitions until exit.
async fn pump_events(ctx: PumpContext, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
    let (project_id, mode) = (&ctx.key.0, ctx.key.1);

    let status = loop {
        match events.recv().await {
            Some(ProcessEvent::Output { stream, line }) => {
                match stream {
                    OutputStream::Stdout => info!(
                        target: PROCESS_LOG_TARGET,
                        project_id = %project_id,
                        mode = %mode,
                        "[Deploy:{}][{}] {}",
                        project_id,
                        stream.as_str(),
                        line
                    ),
                    OutputStream::Stderr => warn!(
                        target: PROCESS_LOG_TARGET,
                        project_id = %project_id,
                        mode = %mode,
                        "[Deploy:{}][{}] {}",
                        project_id,
                        stream.as_str(),
                        line
                    ),
                }
                if ctx.registry.mark_running(&ctx.key, ctx.generation) {
                    debug!(project_id = %project_id, mode = %mode, "Process running");
                }
            }
            Some(ProcessEvent::Exited { code, signal }) => {
                let status = if code == Some(0) {
                    ProcessStatus::Stopped
                } else {
                    ProcessStatus::Error
                };
                info!(
                    project_id = %project_id,
                    mode = %mode,
                    exit_code = ?code,
                    signal = ?signal,
                    status = %status,
                    "Process exited"
                );
                break status;
            }
            None => {
                warn!(
                    project_id = %project_id,
                    mode = %mode,
                    "Process event stream closed without exit"
                );
                break ProcessStatus::Error;
            }
        }
    };

    // A concurrent start may be between removing this entry and inserting
    // its successor.
    let lock = ctx.registry.key_lock(&ctx.key);
    {
        let _guard = lock.lock().await;
        finish_process(&ctx, status).await;
    }
    ctx.registry.prune_key_lock(&ctx.key, lock);
}

/// Apply a terminal status observed by the pump. Called under the key lock.
async fn finish_process(ctx: &PumpContext, status: ProcessStatus) {
    let (project_id, mode) = (&ctx.key.0, ctx.key.1);

    // `None` means the record was already stopped or replaced.
    if let Some(record) = ctx.registry.remove_generation(&ctx.key, ctx.generation, status) {
        ctx.ports.release(record.port);

        if let (Mode::Production, Some(deployments)) = (mode, &ctx.deployments) {
            if let Err(e) = deployments
                .update_deployment_status(project_id, status.as_str())
                .await
            {
                warn!(
                    project_id = %project_id,
                    status = %status,
                    error = %e,
                    "Failed to record deployment exit"
                );
            }
        }
    }

    if ctx.registry.has_newer(&ctx.key, ctx.generation) {
        debug!(
            project_id = %project_id,
            mode = %mode,
            "Newer process registered, keeping project status"
        );
        return;
    }
    reset_project_status(ctx.projects.as_ref(), project_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(ProcessStatus::Starting.as_str(), "starting");
        assert_eq!(ProcessStatus::Running.to_string(), "running");
        assert!(ProcessStatus::Stopped.is_terminal());
        assert!(ProcessStatus::Error.is_terminal());
        assert!(!ProcessStatus::Running.is_terminal());
        assert_eq!(Mode::Production.to_string(), "production");
    }

    #[test]
    fn test_registry_generation_guards_removal() {
        let registry = ProcessRegistry::new();
        let key: Key = ("p1".to_string(), Mode::Preview);
        let record = |port| ProcessRecord {
            project_id: "p1".into(),
            mode: Mode::Preview,
            handle: None,
            port,
            url: format!("http://localhost:{}", port),
            status: ProcessStatus::Starting,
            started_at: Utc::now(),
            status_rx: None,
        };

        let (old, _) = registry.insert(key.clone(), record(3100));
        let (new, _) = registry.insert(key.clone(), record(3101));
        assert!(new > old);

        assert!(registry.remove_generation(&key, old, ProcessStatus::Error).is_none());
        assert!(!registry.mark_running(&key, old));
        assert!(registry.has_newer(&key, old));
        assert_eq!(registry.get("p1", Mode::Preview).unwrap().port, 3101);

        assert!(registry.mark_running(&key, new));
        assert_eq!(
            registry.get("p1", Mode::Preview).unwrap().status,
            ProcessStatus::Running
        );

        let removed = registry
            .remove_generation(&key, new, ProcessStatus::Stopped)
            .unwrap();
        assert_eq!(removed.status, ProcessStatus::Stopped);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_key_locks_are_pruned_after_use() {
        let runner = Arc::new(crate::runner::MockRunner::new());
        let supervisor = ProcessSupervisor::new(
            runner.clone(),
            Arc::new(PortAllocator::new(43300, 43349)),
            Arc::new(crate::store::MemoryStore::new()),
        );

        for i in 0..5 {
            let id = format!("p{}", i);
            let spec = CommandSpec::new("npm", ["run", "dev"], "/tmp");
            supervisor.start(&id, Mode::Preview, spec).await.unwrap();
            supervisor.stop(&id, Mode::Preview).await.unwrap();
        }
        assert!(supervisor.stop("never-started", Mode::Production).await.is_none());

        // Let the pumps observe the SIGTERM exits.
        for _ in 0..100 {
            if runner.live_count().await == 0 && supervisor.registry().key_lock_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(supervisor.registry().key_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_transition_times_out_in_starting() {
        let registry = ProcessRegistry::new();
        let (_, record) = registry.insert(
            ("p1".to_string(), Mode::Production),
            ProcessRecord {
                project_id: "p1".into(),
                mode: Mode::Production,
                handle: None,
                port: 3100,
                url: "http://localhost:3100".into(),
                status: ProcessStatus::Starting,
                started_at: Utc::now(),
                status_rx: None,
            },
        );

        let status = record.wait_for_transition(Duration::from_millis(20)).await;
        assert_eq!(status, ProcessStatus::Starting);
    }
}
