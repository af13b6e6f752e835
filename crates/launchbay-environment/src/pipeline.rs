// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build and deploy pipeline.
//!
//! Preview: install dependencies, then start the development server.
//!
//! Deploy: resolve the working directory, provision the project database,
//! write `DATABASE_URL` into `.env.production`, install, build, start the
//! production server and upsert the deployment record. Any failure up to and
//! including the build aborts before a process is spawned. A failed spawn
//! does not: it is recorded as status `error` and returned. If the deployment
//! record cannot be written the production process is stopped again.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::{Config, Toolchain};
use crate::deployment::{DeploymentInfo, compute_project_subdomain};
use crate::env_file::{PRODUCTION_ENV_FILE, upsert_env_var};
use crate::error::{Error, Result};
use crate::provisioner::{DatabaseProvisioner, DatabaseSummary};
use crate::runner::{CommandSpec, Runner};
use crate::store::{DeploymentStore, ProjectRecord, ProjectStore};
use crate::supervisor::{Mode, ProcessRecord, ProcessStatus, ProcessSupervisor};

/// Lines of stderr kept in a build failure.
pub const STDERR_TAIL_LINES: usize = 20;
/// Bytes of stderr kept in a build failure.
pub const STDERR_TAIL_BYTES: usize = 4000;

/// Environment key the database connection string is written under.
pub const DATABASE_URL_KEY: &str = "DATABASE_URL";

/// Settings the pipeline needs from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of default project working directories.
    pub projects_dir: PathBuf,
    /// Install/build/run commands.
    pub toolchain: Toolchain,
    /// Base domain for external URLs.
    pub apps_base_domain: Option<String>,
    /// Bounded wait for the production process to leave `starting`.
    pub deploy_status_wait: Duration,
}

impl PipelineSettings {
    /// Settings with defaults and the given projects directory.
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            toolchain: Toolchain::default(),
            apps_base_domain: None,
            deploy_status_wait: Duration::from_secs(3),
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            projects_dir: config.projects_dir.clone(),
            toolchain: config.toolchain.clone(),
            apps_base_domain: config.apps_base_domain.clone(),
            deploy_status_wait: config.deploy_status_wait,
        }
    }
}

/// Output of a dependency install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    /// Combined stdout and stderr of the install command.
    pub logs: String,
}

/// Result of a deploy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    /// Database summary, never containing the password.
    pub database: DatabaseSummary,
    /// Deployment as persisted.
    pub deployment: DeploymentInfo,
    /// Env file the connection string was written to.
    pub env_path: PathBuf,
}

/// Orchestrates preview and production lifecycles.
pub struct BuildDeployPipeline {
    settings: PipelineSettings,
    runner: Arc<dyn Runner>,
    supervisor: Arc<ProcessSupervisor>,
    provisioner: Arc<DatabaseProvisioner>,
    projects: Arc<dyn ProjectStore>,
    deployments: Arc<dyn DeploymentStore>,
}

impl BuildDeployPipeline {
    /// Create a pipeline.
    pub fn new(
        settings: PipelineSettings,
        runner: Arc<dyn Runner>,
        supervisor: Arc<ProcessSupervisor>,
        provisioner: Arc<DatabaseProvisioner>,
        projects: Arc<dyn ProjectStore>,
        deployments: Arc<dyn DeploymentStore>,
    ) -> Self {
        Self {
            settings,
            runner,
            supervisor,
            provisioner,
            projects,
            deployments,
        }
    }

    /// The supervisor processes are started through.
    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    async fn project(&self, project_id: &str) -> Result<ProjectRecord> {
        self.projects
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::project_not_found(project_id))
    }

    /// Working directory of a project, created if missing.
    async fn working_dir(&self, project: &ProjectRecord) -> Result<PathBuf> {
        let dir = match project.repo_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.settings.projects_dir.join(&project.id),
        };
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn run_step(&self, step: &'static str, spec: &CommandSpec) -> Result<String> {
        info!(
            step = step,
            command = %spec.display(),
            dir = %spec.working_dir.display(),
            "Running step"
        );
        let output = self.runner.run(spec).await?;
        if !output.success() {
            warn!(step = step, exit_code = ?output.exit_code, "Step failed");
            return Err(Error::BuildFailed {
                step,
                exit_code: output.exit_code,
                stderr_tail: output.stderr_tail(STDERR_TAIL_LINES, STDERR_TAIL_BYTES),
            });
        }
        info!(step = step, duration_ms = output.duration_ms, "Step finished");
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn install_in(&self, dir: &Path) -> Result<String> {
        self.run_step("install", &self.settings.toolchain.install.spec(dir))
            .await
    }

    /// Install the project's dependencies.
    #[instrument(skip(self))]
    pub async fn install_dependencies(&self, project_id: &str) -> Result<InstallReport> {
        let project = self.project(project_id).await?;
        let dir = self.working_dir(&project).await?;
        let logs = self.install_in(&dir).await?;
        Ok(InstallReport { logs })
    }

    /// Install dependencies and (re)start the preview server.
    #[instrument(skip(self))]
    pub async fn start_preview(&self, project_id: &str) -> Result<ProcessRecord> {
        let project = self.project(project_id).await?;
        let dir = self.working_dir(&project).await?;
        self.install_in(&dir).await?;

        let spec = self.settings.toolchain.preview.spec(&dir);
        self.supervisor.start(project_id, Mode::Preview, spec).await
    }

    /// Live preview record, if any.
    pub async fn get_preview_status(&self, project_id: &str) -> Result<Option<ProcessRecord>> {
        self.project(project_id).await?;
        Ok(self.supervisor.status(project_id, Mode::Preview))
    }

    /// Stop the preview server. Absent preview is not an error.
    #[instrument(skip(self))]
    pub async fn stop_preview(&self, project_id: &str) -> Result<Option<ProcessRecord>> {
        self.project(project_id).await?;
        Ok(self.supervisor.stop(project_id, Mode::Preview).await)
    }

    /// Full production deploy.
    #[instrument(skip(self))]
    pub async fn deploy(&self, project_id: &str) -> Result<DeployOutcome> {
        let project = self.project(project_id).await?;
        let dir = self.working_dir(&project).await?;

        let database = self
            .provisioner
            .provision(project_id, &project.owner_id)
            .await?;

        let env_path = dir.join(PRODUCTION_ENV_FILE);
        upsert_env_var(&env_path, DATABASE_URL_KEY, &database.database_url).await?;

        self.install_in(&dir).await?;
        let build = self
            .settings
            .toolchain
            .build
            .spec(&dir)
            .with_env("NODE_ENV", "production");
        self.run_step("build", &build).await?;

        let spec = self
            .settings
            .toolchain
            .production
            .spec(&dir)
            .with_env("NODE_ENV", "production");
        let record = self
            .supervisor
            .start(project_id, Mode::Production, spec)
            .await?;

        let status = if record.status == ProcessStatus::Starting {
            record
                .wait_for_transition(self.settings.deploy_status_wait)
                .await
        } else {
            record.status
        };

        let subdomain = compute_project_subdomain(project_id);
        let persisted = match self
            .deployments
            .upsert_deployment(project_id, &subdomain, i32::from(record.port), status.as_str())
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(
                    project_id = %project_id,
                    error = %e,
                    "Failed to record deployment, stopping production process"
                );
                self.supervisor.stop(project_id, Mode::Production).await;
                return Err(e);
            }
        };

        // The process may have exited between the status read and the upsert.
        let latest = record.current_status();
        let (status, persisted) = if latest.is_terminal() && latest != status {
            let updated = self
                .deployments
                .update_deployment_status(project_id, latest.as_str())
                .await?;
            (latest, updated.unwrap_or(persisted))
        } else {
            (status, persisted)
        };

        let url = (!status.is_terminal()).then(|| record.url.clone());
        let deployment = DeploymentInfo::from_record(
            &persisted,
            url,
            self.settings.apps_base_domain.as_deref(),
        );

        info!(
            project_id = %project_id,
            subdomain = %deployment.subdomain,
            port = deployment.port,
            status = %deployment.status,
            "Deployment finished"
        );

        Ok(DeployOutcome {
            database: database.summary(),
            deployment,
            env_path,
        })
    }

    /// Persisted deployment, overlaid with the live production process.
    pub async fn get_deployment(&self, project_id: &str) -> Result<DeploymentInfo> {
        self.project(project_id).await?;
        let record = self
            .deployments
            .find_deployment(project_id)
            .await?
            .ok_or_else(|| Error::deployment_not_found(project_id))?;

        let base_domain = self.settings.apps_base_domain.as_deref();
        Ok(match self.supervisor.status(project_id, Mode::Production) {
            Some(live) => {
                let mut info = DeploymentInfo::from_record(&record, Some(live.url), base_domain);
                info.status = live.status.as_str().to_string();
                info.port = live.port;
                info
            }
            None => DeploymentInfo::from_record(&record, None, base_domain),
        })
    }

    /// Stop the production process and mark the deployment stopped.
    #[instrument(skip(self))]
    pub async fn stop_deployment(&self, project_id: &str) -> Result<DeploymentInfo> {
        self.project(project_id).await?;
        if self.deployments.find_deployment(project_id).await?.is_none() {
            return Err(Error::deployment_not_found(project_id));
        }

        self.supervisor.stop(project_id, Mode::Production).await;

        let record = self
            .deployments
            .update_deployment_status(project_id, ProcessStatus::Stopped.as_str())
            .await?
            .ok_or_else(|| Error::deployment_not_found(project_id))?;

        Ok(DeploymentInfo::from_record(
            &record,
            None,
            self.settings.apps_base_domain.as_deref(),
        ))
    }
}
