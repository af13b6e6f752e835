// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{
    DeploymentRecord, DeploymentStore, ProjectRecord, ProjectStore, ServiceConnection,
    ServiceRegistry,
};
use crate::error::Result;

/// Store implementation over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store client.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check that the database answers.
    pub async fn health_check(&self) -> Result<bool> {
        let ok = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)?;
        Ok(ok)
    }
}

#[async_trait]
impl ProjectStore for PostgresStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let project = sqlx::query_as::<_, ProjectRecord>(
            "SELECT id, owner_id, name, repo_path, status FROM projects WHERE id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    async fn update_project_status(&self, project_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE projects SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(project_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        tracing::debug!(project_id = %project_id, status = %status, "Updated project status");

        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for PostgresStore {
    async fn get_project_service(
        &self,
        project_id: &str,
        service_type: &str,
    ) -> Result<Option<ServiceConnection>> {
        let connection = sqlx::query_as::<_, ServiceConnection>(
            r#"
            SELECT project_id, service_type, service_data, updated_at
            FROM project_services
            WHERE project_id = $1 AND service_type = $2
            "#,
        )
        .bind(project_id)
        .bind(service_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(connection)
    }

    async fn upsert_project_service_connection(
        &self,
        project_id: &str,
        service_type: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_services (project_id, service_type, service_data, status)
            VALUES ($1, $2, $3, 'connected')
            ON CONFLICT (project_id, service_type) DO UPDATE SET
                service_data = EXCLUDED.service_data,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(project_id)
        .bind(service_type)
        .bind(&data)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            project_id = %project_id,
            service_type = %service_type,
            "Stored project service connection"
        );

        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn find_deployment(&self, project_id: &str) -> Result<Option<DeploymentRecord>> {
        let deployment = sqlx::query_as::<_, DeploymentRecord>(
            r#"
            SELECT project_id, subdomain, port, status, created_at, updated_at
            FROM project_deployments
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deployment)
    }

    async fn upsert_deployment(
        &self,
        project_id: &str,
        subdomain: &str,
        port: i32,
        status: &str,
    ) -> Result<DeploymentRecord> {
        let deployment = sqlx::query_as::<_, DeploymentRecord>(
            r#"
            INSERT INTO project_deployments (project_id, subdomain, port, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (project_id) DO UPDATE SET
                subdomain = EXCLUDED.subdomain,
                port = EXCLUDED.port,
                status = EXCLUDED.status,
                updated_at = NOW()
            RETURNING project_id, subdomain, port, status, created_at, updated_at
            "#,
        )
        .bind(project_id)
        .bind(subdomain)
        .bind(port)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            project_id = %project_id,
            subdomain = %subdomain,
            port = port,
            status = %status,
            "Upserted deployment record"
        );

        Ok(deployment)
    }

    async fn update_deployment_status(
        &self,
        project_id: &str,
        status: &str,
    ) -> Result<Option<DeploymentRecord>> {
        let deployment = sqlx::query_as::<_, DeploymentRecord>(
            r#"
            UPDATE project_deployments
            SET status = $2, updated_at = NOW()
            WHERE project_id = $1
            RETURNING project_id, subdomain, port, status, created_at, updated_at
            "#,
        )
        .bind(project_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deployment)
    }
}
