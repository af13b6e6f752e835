// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces for the records this service reads and writes.
//!
//! The orchestrator never talks to a database directly; it goes through the
//! three traits below so the pipeline can run against PostgreSQL in
//! production and against [`MemoryStore`] in tests.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Service kind under which provisioned database metadata is stored.
pub const INTERNAL_DB_SERVICE: &str = "internal_db";

/// Project status written when a project's process goes away.
pub const PROJECT_STATUS_IDLE: &str = "idle";

/// Project record (subset relevant to orchestration).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectRecord {
    /// Project identifier.
    pub id: String,
    /// User that owns the project; database roles are derived from it.
    pub owner_id: String,
    /// Display name.
    pub name: String,
    /// Working tree location, if the project has one assigned.
    pub repo_path: Option<String>,
    /// Free-form lifecycle status.
    pub status: String,
}

/// Connection data stored for a (project, service kind) pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceConnection {
    /// Owning project.
    pub project_id: String,
    /// Service kind, e.g. [`INTERNAL_DB_SERVICE`].
    pub service_type: String,
    /// Arbitrary JSON payload.
    pub service_data: serde_json::Value,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

/// Persisted deployment record, one per project.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeploymentRecord {
    /// Owning project.
    pub project_id: String,
    /// Stable subdomain derived from the project ID.
    pub subdomain: String,
    /// Port the production process was started on.
    pub port: i32,
    /// Last observed process status.
    pub status: String,
    /// First deploy.
    pub created_at: DateTime<Utc>,
    /// Last redeploy or status change.
    pub updated_at: DateTime<Utc>,
}

/// Project record store.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Look up a project.
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;

    /// Overwrite a project's status.
    async fn update_project_status(&self, project_id: &str, status: &str) -> Result<()>;
}

/// Per-project service connection registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Fetch the connection for a service kind.
    async fn get_project_service(
        &self,
        project_id: &str,
        service_type: &str,
    ) -> Result<Option<ServiceConnection>>;

    /// Create or replace the connection for a service kind.
    async fn upsert_project_service_connection(
        &self,
        project_id: &str,
        service_type: &str,
        data: serde_json::Value,
    ) -> Result<()>;
}

/// Deployment record store.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Fetch the deployment record of a project.
    async fn find_deployment(&self, project_id: &str) -> Result<Option<DeploymentRecord>>;

    /// Create the record on first deploy, update it in place afterwards.
    async fn upsert_deployment(
        &self,
        project_id: &str,
        subdomain: &str,
        port: i32,
        status: &str,
    ) -> Result<DeploymentRecord>;

    /// Change only the status. Returns `None` if there is no record.
    async fn update_deployment_status(
        &self,
        project_id: &str,
        status: &str,
    ) -> Result<Option<DeploymentRecord>>;
}
