// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for launchbay-environment.
//!
//! [`LaunchbayRuntime`] wires the stores, port allocator, supervisor,
//! provisioner and pipeline together and serves the HTTP API. It can run as
//! the standalone binary or inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use launchbay_environment::runner::NativeRunner;
//! use launchbay_environment::runtime::LaunchbayRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!
//!     let runtime = LaunchbayRuntime::builder()
//!         .pool(pool)
//!         .runner(Arc::new(NativeRunner::new()))
//!         .admin_database_url("postgres://admin:...@db/postgres")
//!         .bind_addr("0.0.0.0:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, Toolchain};
use crate::handlers::HandlerState;
use crate::pipeline::{BuildDeployPipeline, PipelineSettings};
use crate::ports::PortAllocator;
use crate::provisioner::{AdminDatabase, DatabaseProvisioner, PgAdminDatabase};
use crate::runner::Runner;
use crate::server::run_http_server;
use crate::store::{DeploymentStore, MemoryStore, PostgresStore, ProjectStore, ServiceRegistry};
use crate::supervisor::ProcessSupervisor;

/// Builder for [`LaunchbayRuntime`].
pub struct LaunchbayRuntimeBuilder {
    pool: Option<PgPool>,
    memory: Option<Arc<MemoryStore>>,
    runner: Option<Arc<dyn Runner>>,
    admin: Arc<dyn AdminDatabase>,
    admin_database_url: Option<String>,
    bind_addr: SocketAddr,
    settings: PipelineSettings,
    port_range: (u16, u16),
    preview_host: String,
}

impl Default for LaunchbayRuntimeBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            memory: None,
            runner: None,
            admin: Arc::new(PgAdminDatabase::new()),
            admin_database_url: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            settings: PipelineSettings::new("projects"),
            port_range: (3100, 3999),
            preview_host: "localhost".to_string(),
        }
    }
}

impl LaunchbayRuntimeBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded from configuration (pool and runner still required).
    pub fn from_config(config: &Config) -> Self {
        Self {
            admin_database_url: config.admin_database_url.clone(),
            bind_addr: config.http_addr,
            settings: PipelineSettings::from(config),
            port_range: config.port_range,
            preview_host: config.preview_host.clone(),
            ..Self::default()
        }
    }

    /// PostgreSQL pool backing all records.
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Keep records in memory instead of PostgreSQL.
    pub fn memory_store(mut self, store: Arc<MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    /// Process backend.
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Administrative database client used for provisioning.
    pub fn admin_database(mut self, admin: Arc<dyn AdminDatabase>) -> Self {
        self.admin = admin;
        self
    }

    /// Administrative connection string.
    pub fn admin_database_url(mut self, url: impl Into<String>) -> Self {
        self.admin_database_url = Some(url.into());
        self
    }

    /// HTTP address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parent directory of default working trees.
    pub fn projects_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.projects_dir = path.into();
        self
    }

    /// Install/build/run commands.
    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.settings.toolchain = toolchain;
        self
    }

    /// Base domain for external URLs.
    pub fn apps_base_domain(mut self, domain: impl Into<String>) -> Self {
        self.settings.apps_base_domain = Some(domain.into());
        self
    }

    /// Bounded wait for a deployment to leave `starting`.
    pub fn deploy_status_wait(mut self, wait: Duration) -> Self {
        self.settings.deploy_status_wait = wait;
        self
    }

    /// Inclusive port range for child processes.
    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    /// Host used in process URLs.
    pub fn preview_host(mut self, host: impl Into<String>) -> Self {
        self.preview_host = host.into();
        self
    }

    /// Assemble the components.
    pub fn build(self) -> Result<LaunchbayRuntimeConfig> {
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("runner is required"))?;

        let (projects, services, deployments, postgres) = match (self.pool, self.memory) {
            (Some(pool), _) => {
                let store = Arc::new(PostgresStore::new(pool.clone()));
                (
                    store.clone() as Arc<dyn ProjectStore>,
                    store.clone() as Arc<dyn ServiceRegistry>,
                    store as Arc<dyn DeploymentStore>,
                    Some(PostgresStore::new(pool)),
                )
            }
            (None, Some(memory)) => (
                memory.clone() as Arc<dyn ProjectStore>,
                memory.clone() as Arc<dyn ServiceRegistry>,
                memory as Arc<dyn DeploymentStore>,
                None,
            ),
            (None, None) => anyhow::bail!("pool or memory_store is required"),
        };

        let ports = Arc::new(PortAllocator::new(self.port_range.0, self.port_range.1));
        let supervisor = Arc::new(
            ProcessSupervisor::new(runner.clone(), ports, projects.clone())
                .with_deployment_store(deployments.clone())
                .with_preview_host(self.preview_host),
        );
        let provisioner = Arc::new(DatabaseProvisioner::new(
            self.admin_database_url,
            self.admin,
            services,
        ));
        let pipeline = Arc::new(BuildDeployPipeline::new(
            self.settings,
            runner,
            supervisor,
            provisioner,
            projects,
            deployments,
        ));

        Ok(LaunchbayRuntimeConfig {
            state: Arc::new(HandlerState::new(pipeline, postgres)),
            bind_addr: self.bind_addr,
        })
    }
}

/// Assembled runtime, not yet serving.
pub struct LaunchbayRuntimeConfig {
    state: Arc<HandlerState>,
    bind_addr: SocketAddr,
}

impl LaunchbayRuntimeConfig {
    /// Shared handler state.
    pub fn state(&self) -> &Arc<HandlerState> {
        &self.state
    }

    /// Start serving HTTP.
    pub async fn start(self) -> Result<LaunchbayRuntime> {
        let shutdown = Arc::new(Notify::new());
        let server_handle = tokio::spawn(run_http_server(
            self.bind_addr,
            self.state.clone(),
            shutdown.clone(),
        ));

        info!(bind_addr = %self.bind_addr, "LaunchbayRuntime started");

        Ok(LaunchbayRuntime {
            server_handle,
            shutdown,
            state: self.state,
            bind_addr: self.bind_addr,
        })
    }
}

/// Running Launchbay service.
pub struct LaunchbayRuntime {
    server_handle: JoinHandle<Result<()>>,
    shutdown: Arc<Notify>,
    state: Arc<HandlerState>,
    bind_addr: SocketAddr,
}

impl LaunchbayRuntime {
    /// Create a builder.
    pub fn builder() -> LaunchbayRuntimeBuilder {
        LaunchbayRuntimeBuilder::new()
    }

    /// HTTP address.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Shared handler state.
    pub fn state(&self) -> &Arc<HandlerState> {
        &self.state
    }

    /// Whether the HTTP server task is still alive.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Stop every supervised process, then the HTTP server.
    pub async fn shutdown(self) -> Result<()> {
        info!("LaunchbayRuntime shutting down...");

        let stopped = self.state.pipeline.supervisor().stop_all().await;
        info!(stopped = stopped, "Stopped supervised processes");

        self.shutdown.notify_one();

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("LaunchbayRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("LaunchbayRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("LaunchbayRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}
