// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store for tests and embedding.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::{
    DeploymentRecord, DeploymentStore, ProjectRecord, ProjectStore, ServiceConnection,
    ServiceRegistry,
};
use crate::error::Result;

/// Most recent status writes kept by [`MemoryStore::status_history`].
pub const STATUS_HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Default)]
struct Tables {
    projects: HashMap<String, ProjectRecord>,
    services: HashMap<(String, String), ServiceConnection>,
    deployments: HashMap<String, DeploymentRecord>,
    status_history: VecDeque<(String, String)>,
}

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project.
    pub async fn insert_project(&self, project: ProjectRecord) {
        self.tables
            .lock()
            .await
            .projects
            .insert(project.id.clone(), project);
    }

    /// Convenience: a project owned by `owner_id` with no repo path.
    pub async fn add_project(&self, project_id: &str, owner_id: &str) {
        self.insert_project(ProjectRecord {
            id: project_id.to_string(),
            owner_id: owner_id.to_string(),
            name: project_id.to_string(),
            repo_path: None,
            status: "idle".to_string(),
        })
        .await;
    }

    /// The last [`STATUS_HISTORY_LIMIT`] `(project_id, status)` pairs written
    /// through `update_project_status`, oldest first.
    pub async fn status_history(&self) -> Vec<(String, String)> {
        self.tables
            .lock()
            .await
            .status_history
            .iter()
            .cloned()
            .collect()
    }

    /// Number of deployment records.
    pub async fn deployment_count(&self) -> usize {
        self.tables.lock().await.deployments.len()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self.tables.lock().await.projects.get(project_id).cloned())
    }

    async fn update_project_status(&self, project_id: &str, status: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(project) = tables.projects.get_mut(project_id) {
            project.status = status.to_string();
        }
        if tables.status_history.len() == STATUS_HISTORY_LIMIT {
            tables.status_history.pop_front();
        }
        tables
            .status_history
            .push_back((project_id.to_string(), status.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for MemoryStore {
    async fn get_project_service(
        &self,
        project_id: &str,
        service_type: &str,
    ) -> Result<Option<ServiceConnection>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .services
            .get(&(project_id.to_string(), service_type.to_string()))
            .cloned())
    }

    async fn upsert_project_service_connection(
        &self,
        project_id: &str,
        service_type: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.services.insert(
            (project_id.to_string(), service_type.to_string()),
            ServiceConnection {
                project_id: project_id.to_string(),
                service_type: service_type.to_string(),
                service_data: data,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn find_deployment(&self, project_id: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self.tables.lock().await.deployments.get(project_id).cloned())
    }

    async fn upsert_deployment(
        &self,
        project_id: &str,
        subdomain: &str,
        port: i32,
        status: &str,
    ) -> Result<DeploymentRecord> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let record = tables
            .deployments
            .entry(project_id.to_string())
            .and_modify(|d| {
                d.subdomain = subdomain.to_string();
                d.port = port;
                d.status = status.to_string();
                d.updated_at = now;
            })
            .or_insert_with(|| DeploymentRecord {
                project_id: project_id.to_string(),
                subdomain: subdomain.to_string(),
                port,
                status: status.to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(record.clone())
    }

    async fn update_deployment_status(
        &self,
        project_id: &str,
        status: &str,
    ) -> Result<Option<DeploymentRecord>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.deployments.get_mut(project_id).map(|d| {
            d.status = status.to_string();
            d.updated_at = Utc::now();
            d.clone()
        }))
    }
}
