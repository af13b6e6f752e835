// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build and deploy pipeline tests on the mock runner and in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, HarnessOptions, RecordingAdmin};
use launchbay_environment::error::{Error, Result};
use launchbay_environment::runner::MockRunner;
use launchbay_environment::store::{
    DeploymentRecord, DeploymentStore, MemoryStore, ProjectRecord, ServiceRegistry,
};
use launchbay_environment::supervisor::{Mode, ProcessStatus};

async fn env_file(h: &Harness, project_id: &str) -> String {
    tokio::fs::read_to_string(h.project_dir(project_id).join(".env.production"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_unknown_project_is_not_found_everywhere() {
    let h = Harness::new(MockRunner::chatty());

    let err = h.pipeline.start_preview("ghost").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert!(h.pipeline.get_preview_status("ghost").await.is_err());
    assert!(h.pipeline.stop_preview("ghost").await.is_err());
    assert!(h.pipeline.install_dependencies("ghost").await.is_err());
    assert!(h.pipeline.deploy("ghost").await.is_err());
    assert!(h.pipeline.get_deployment("ghost").await.is_err());
    assert!(h.pipeline.stop_deployment("ghost").await.is_err());

    assert!(h.runner.ran().await.is_empty());
    assert!(h.runner.launched().await.is_empty());
}

#[tokio::test]
async fn test_start_preview_installs_then_starts_dev_server() {
    let h = Harness::new(MockRunner::chatty());
    h.store.add_project("p1", "u1").await;

    let record = h.pipeline.start_preview("p1").await.unwrap();

    assert_eq!(record.mode, Mode::Preview);
    assert!(h.project_dir("p1").is_dir());

    let ran = h.runner.ran().await;
    assert_eq!(ran.len(), 1);
    assert_eq!(ran[0].display(), "npm install");
    assert_eq!(ran[0].working_dir, h.project_dir("p1"));

    let launched = h.runner.launched().await;
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].display(), "npm run dev");
    assert_eq!(launched[0].env.get("PORT"), Some(&record.port.to_string()));

    let status = h.pipeline.get_preview_status("p1").await.unwrap().unwrap();
    assert_eq!(status.port, record.port);
}

#[tokio::test]
async fn test_start_preview_uses_repo_path() {
    let h = Harness::new(MockRunner::chatty());
    let repo = tempfile::TempDir::new().unwrap();
    h.store
        .insert_project(ProjectRecord {
            id: "p1".into(),
            owner_id: "u1".into(),
            name: "Repo project".into(),
            repo_path: Some(repo.path().display().to_string()),
            status: "idle".into(),
        })
        .await;

    h.pipeline.start_preview("p1").await.unwrap();

    assert_eq!(h.runner.launched().await[0].working_dir, repo.path());
    assert!(!h.project_dir("p1").exists());
}

#[tokio::test]
async fn test_failed_install_aborts_preview() {
    let h = Harness::new(MockRunner::chatty().with_failing_command("npm install"));
    h.store.add_project("p1", "u1").await;

    let err = h.pipeline.start_preview("p1").await.unwrap_err();

    match &err {
        Error::BuildFailed {
            step,
            exit_code,
            stderr_tail,
        } => {
            assert_eq!(*step, "install");
            assert_eq!(*exit_code, Some(1));
            assert!(stderr_tail.contains("mock failure"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(h.runner.launched().await.is_empty());
}

#[tokio::test]
async fn test_preview_stop_and_status_when_absent() {
    let h = Harness::new(MockRunner::new());
    h.store.add_project("proj-123", "u1").await;

    assert!(h.pipeline.get_preview_status("proj-123").await.unwrap().is_none());
    assert!(h.pipeline.stop_preview("proj-123").await.unwrap().is_none());
    assert!(h.pipeline.stop_preview("proj-123").await.unwrap().is_none());
}

#[tokio::test]
async fn test_install_dependencies_returns_logs() {
    let h = Harness::new(MockRunner::new());
    h.store.add_project("p1", "u1").await;

    let report = h.pipeline.install_dependencies("p1").await.unwrap();

    assert!(report.logs.contains("npm install"));
    assert!(h.runner.launched().await.is_empty());
}

#[tokio::test]
async fn test_deploy_end_to_end() {
    let h = Harness::new(MockRunner::chatty());
    h.store.add_project("proj-123", "user-1").await;

    let outcome = h.pipeline.deploy("proj-123").await.unwrap();

    let ran: Vec<String> = h.runner.ran().await.iter().map(|s| s.display()).collect();
    assert_eq!(ran, vec!["npm install", "npm run build"]);
    assert_eq!(
        h.runner.ran().await[1].env.get("NODE_ENV").map(String::as_str),
        Some("production")
    );

    let launched = h.runner.launched().await;
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].display(), "npm run start");
    assert_eq!(
        launched[0].env.get("PORT"),
        Some(&outcome.deployment.port.to_string())
    );

    let deployment = &outcome.deployment;
    assert_eq!(deployment.subdomain, "proj-proj-123");
    assert_eq!(deployment.status, "running");
    assert_eq!(
        deployment.url.as_deref(),
        Some(format!("http://localhost:{}", deployment.port).as_str())
    );
    assert_eq!(
        deployment.external_url.as_deref(),
        Some("https://proj-proj-123.apps.test")
    );

    assert_eq!(outcome.database.name, "app_db_proj_123");
    assert_eq!(outcome.database.username, "app_u_user_1");
    assert_eq!(outcome.database.host, "db.test");
    assert_eq!(outcome.database.port, 5433);
    assert!(outcome.database.has_password);

    let json = serde_json::to_string(&outcome).unwrap();
    let password = h.admin.password_of("app_u_user_1").unwrap();
    assert!(!json.contains(&password));

    let env = env_file(&h, "proj-123").await;
    assert_eq!(env.matches("DATABASE_URL=").count(), 1);
    assert!(env.contains("/app_db_proj_123"));
    assert_eq!(outcome.env_path, h.project_dir("proj-123").join(".env.production"));

    assert_eq!(h.store.deployment_count().await, 1);
    let stored = h.store.find_deployment("proj-123").await.unwrap().unwrap();
    assert_eq!(stored.status, "running");
}

#[tokio::test]
async fn test_redeploy_is_idempotent() {
    let h = Harness::new(MockRunner::chatty());
    h.store.add_project("proj-123", "user-1").await;
    tokio::fs::create_dir_all(h.project_dir("proj-123")).await.unwrap();
    tokio::fs::write(
        h.project_dir("proj-123").join(".env.production"),
        "API_KEY=abc\nDATABASE_URL=postgres://stale\n",
    )
    .await
    .unwrap();

    let first = h.pipeline.deploy("proj-123").await.unwrap();
    let second = h.pipeline.deploy("proj-123").await.unwrap();

    let env = env_file(&h, "proj-123").await;
    assert_eq!(env.matches("DATABASE_URL=").count(), 1);
    assert!(env.starts_with("API_KEY=abc\n"));
    assert!(!env.contains("stale"));

    assert_eq!(h.admin.calls().len(), 1);
    assert_eq!(h.store.deployment_count().await, 1);
    assert_eq!(first.deployment.subdomain, second.deployment.subdomain);
    assert_eq!(first.database, second.database);

    // The second deploy replaced the first production process.
    assert_eq!(h.runner.stopped().await.len(), 1);
    assert_eq!(h.supervisor.registry().len(), 1);
}

#[tokio::test]
async fn test_failed_build_aborts_before_spawn() {
    let h = Harness::new(MockRunner::chatty().with_failing_command("run build"));
    h.store.add_project("p1", "u1").await;

    let err = h.pipeline.deploy("p1").await.unwrap_err();

    assert_eq!(err.kind(), "build_failed");
    assert!(matches!(err, Error::BuildFailed { step: "build", .. }));
    assert!(h.runner.launched().await.is_empty());
    assert_eq!(h.store.deployment_count().await, 0);
}

#[tokio::test]
async fn test_deploy_without_admin_url_is_configuration_error() {
    let h = Harness::with_options(
        MockRunner::chatty(),
        RecordingAdmin::new(),
        HarnessOptions {
            admin_url: None,
            ..HarnessOptions::default()
        },
    );
    h.store.add_project("p1", "u1").await;

    let err = h.pipeline.deploy("p1").await.unwrap_err();

    assert_eq!(err.kind(), "configuration_error");
    assert!(h.runner.ran().await.is_empty());
    assert!(h.runner.launched().await.is_empty());
}

#[tokio::test]
async fn test_provisioning_failure_aborts_deploy() {
    let h = Harness::with_options(
        MockRunner::chatty(),
        RecordingAdmin::new().failing_role("app_u_u1"),
        HarnessOptions::default(),
    );
    h.store.add_project("p1", "u1").await;

    let err = h.pipeline.deploy("p1").await.unwrap_err();

    assert_eq!(err.kind(), "provisioning_failed");
    assert!(h.runner.ran().await.is_empty());
    assert!(h.runner.launched().await.is_empty());
}

#[tokio::test]
async fn test_spawn_failure_is_recorded_not_raised() {
    let h = Harness::new(MockRunner::failing_spawn());
    h.store.add_project("p1", "u1").await;

    let outcome = h.pipeline.deploy("p1").await.unwrap();

    assert_eq!(outcome.deployment.status, "error");
    assert!(outcome.deployment.url.is_none());
    let stored = h.store.find_deployment("p1").await.unwrap().unwrap();
    assert_eq!(stored.status, "error");
}

#[tokio::test]
async fn test_silent_process_is_recorded_as_starting() {
    let h = Harness::with_options(
        MockRunner::new(),
        RecordingAdmin::new(),
        HarnessOptions {
            deploy_status_wait: Duration::from_millis(50),
            ..HarnessOptions::default()
        },
    );
    h.store.add_project("p1", "u1").await;

    let outcome = h.pipeline.deploy("p1").await.unwrap();

    assert_eq!(outcome.deployment.status, "starting");
    assert!(outcome.deployment.url.is_some());
}

#[tokio::test]
async fn test_deploy_without_base_domain_has_no_external_url() {
    let h = Harness::with_options(
        MockRunner::chatty(),
        RecordingAdmin::new(),
        HarnessOptions {
            apps_base_domain: None,
            ..HarnessOptions::default()
        },
    );
    h.store.add_project("p1", "u1").await;

    let outcome = h.pipeline.deploy("p1").await.unwrap();

    assert!(outcome.deployment.external_url.is_none());
}

#[tokio::test]
async fn test_get_and_stop_deployment() {
    let h = Harness::new(MockRunner::chatty());
    h.store.add_project("p1", "u1").await;

    let err = h.pipeline.get_deployment("p1").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "Deployment", .. }));
    let err = h.pipeline.stop_deployment("p1").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let outcome = h.pipeline.deploy("p1").await.unwrap();

    let live = h.pipeline.get_deployment("p1").await.unwrap();
    assert_eq!(live.status, "running");
    assert_eq!(live.url, outcome.deployment.url);

    let stopped = h.pipeline.stop_deployment("p1").await.unwrap();
    assert_eq!(stopped.status, "stopped");
    assert!(stopped.url.is_none());
    assert!(h.supervisor.status("p1", Mode::Production).is_none());

    let after = h.pipeline.get_deployment("p1").await.unwrap();
    assert_eq!(after.status, "stopped");
    assert!(after.url.is_none());
    assert_eq!(after.external_url.as_deref(), Some("https://proj-p1.apps.test"));

    // Stopping again is still fine.
    let again = h.pipeline.stop_deployment("p1").await.unwrap();
    assert_eq!(again.status, "stopped");
}

async fn deploy_then_exit(h: &Harness, project_id: &str, code: i32) {
    h.store.add_project(project_id, "u1").await;
    h.pipeline.deploy(project_id).await.unwrap();

    let record = h.supervisor.status(project_id, Mode::Production).unwrap();
    h.runner
        .exit(&record.handle.unwrap().handle_id, code)
        .await;

    let store = h.store.clone();
    let project_id = project_id.to_string();
    assert!(
        common::eventually(Duration::from_secs(2), || {
            let store = store.clone();
            let project_id = project_id.clone();
            async move {
                store
                    .find_deployment(&project_id)
                    .await
                    .unwrap()
                    .is_some_and(|d| d.status != "running")
            }
        })
        .await,
        "deployment exit was never recorded"
    );
}

#[tokio::test]
async fn test_crashed_deployment_is_reported_as_error() {
    let h = Harness::new(MockRunner::chatty());
    deploy_then_exit(&h, "p1", 1).await;

    assert!(h.supervisor.status("p1", Mode::Production).is_none());
    let info = h.pipeline.get_deployment("p1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Error.as_str());
    assert!(info.url.is_none());

    let stored = h
        .store
        .get_project_service("p1", "internal_db")
        .await
        .unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn test_cleanly_exited_deployment_is_reported_as_stopped() {
    let h = Harness::new(MockRunner::chatty());
    deploy_then_exit(&h, "p1", 0).await;

    let info = h.pipeline.get_deployment("p1").await.unwrap();
    assert_eq!(info.status, ProcessStatus::Stopped.as_str());
    assert!(info.url.is_none());
}

#[tokio::test]
async fn test_explicit_stop_is_not_overwritten_by_exit() {
    let h = Harness::new(MockRunner::chatty());
    h.store.add_project("p1", "u1").await;
    h.pipeline.deploy("p1").await.unwrap();

    h.pipeline.stop_deployment("p1").await.unwrap();

    // The SIGTERM exit reaches the pump after the record was removed.
    let store = h.store.clone();
    assert!(
        common::eventually(Duration::from_secs(2), || {
            let store = store.clone();
            async move { !store.status_history().await.is_empty() }
        })
        .await
    );
    let info = h.pipeline.get_deployment("p1").await.unwrap();
    assert_eq!(info.status, "stopped");
}

#[tokio::test]
async fn test_preview_exit_leaves_deployment_untouched() {
    let h = Harness::new(MockRunner::chatty());
    h.store.add_project("p1", "u1").await;
    h.pipeline.deploy("p1").await.unwrap();

    let preview = h.pipeline.start_preview("p1").await.unwrap();
    h.runner
        .exit(&preview.handle.unwrap().handle_id, 1)
        .await;

    let supervisor = h.supervisor.clone();
    assert!(
        common::eventually(Duration::from_secs(2), || {
            let supervisor = supervisor.clone();
            async move { supervisor.status("p1", Mode::Preview).is_none() }
        })
        .await
    );
    let stored = h.store.find_deployment("p1").await.unwrap().unwrap();
    assert_eq!(stored.status, "running");
}

/// Deployment store whose upserts always fail.
struct RejectingDeployments(Arc<MemoryStore>);

#[async_trait]
impl DeploymentStore for RejectingDeployments {
    async fn find_deployment(&self, project_id: &str) -> Result<Option<DeploymentRecord>> {
        self.0.find_deployment(project_id).await
    }

    async fn upsert_deployment(
        &self,
        _project_id: &str,
        subdomain: &str,
        _port: i32,
        _status: &str,
    ) -> Result<DeploymentRecord> {
        Err(Error::Database(sqlx::Error::Protocol(format!(
            "duplicate subdomain {}",
            subdomain
        ))))
    }

    async fn update_deployment_status(
        &self,
        project_id: &str,
        status: &str,
    ) -> Result<Option<DeploymentRecord>> {
        self.0.update_deployment_status(project_id, status).await
    }
}

#[tokio::test]
async fn test_failed_deployment_record_stops_process() {
    let h = Harness::with_options(
        MockRunner::chatty(),
        RecordingAdmin::new(),
        HarnessOptions {
            deployments: Some(Arc::new(RejectingDeployments(Arc::new(MemoryStore::new())))),
            ..HarnessOptions::default()
        },
    );
    h.store.add_project("p1", "u1").await;

    let err = h.pipeline.deploy("p1").await.unwrap_err();

    assert_eq!(err.kind(), "internal");
    assert!(h.supervisor.status("p1", Mode::Production).is_none());
    let launched = h.runner.launched().await;
    assert_eq!(launched.len(), 1);
    assert_eq!(h.runner.stopped().await.len(), 1);
    assert_eq!(h.runner.live_count().await, 0);

    let port: u16 = launched[0].env["PORT"].parse().unwrap();
    assert!(!h.ports.is_reserved(port));
}
