// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API.
//!
//! Every response is an envelope: `{"success": true, "data": ...}` or
//! `{"success": false, "error": <kind>, "message": <text>}`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::Error;
use crate::handlers::{HandlerState, handle_health_check};

type SharedState = Arc<HandlerState>;

/// Error as returned to HTTP callers.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// HTTP status for an error kind.
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "not_found" => StatusCode::NOT_FOUND,
        "resource_exhausted" => StatusCode::SERVICE_UNAVAILABLE,
        "build_failed" => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for_kind(kind);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(kind = kind, error = %self.0, "Request failed");
        }
        let body = json!({
            "success": false,
            "error": kind,
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

type ApiResult = std::result::Result<Json<serde_json::Value>, ApiError>;

/// Build the router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/projects/{id}/preview/start", post(start_preview))
        .route("/api/projects/{id}/preview/status", get(preview_status))
        .route("/api/projects/{id}/preview/stop", post(stop_preview))
        .route(
            "/api/projects/{id}/install-dependencies",
            post(install_dependencies),
        )
        .route("/api/projects/{id}/deploy", post(deploy))
        .route("/api/projects/{id}/deployment", get(get_deployment))
        .route("/api/projects/{id}/deployment/stop", post(stop_deployment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> Response {
    let report = handle_health_check(&state).await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({ "success": report.healthy, "data": report })),
    )
        .into_response()
}

async fn start_preview(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let record = state.pipeline.start_preview(&id).await?;
    Ok(ok(record))
}

async fn preview_status(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let record = state.pipeline.get_preview_status(&id).await?;
    Ok(ok(record))
}

async fn stop_preview(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let record = state.pipeline.stop_preview(&id).await?;
    Ok(ok(record))
}

async fn install_dependencies(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult {
    let report = state.pipeline.install_dependencies(&id).await?;
    Ok(ok(report))
}

async fn deploy(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let outcome = state.pipeline.deploy(&id).await?;
    Ok(ok(outcome))
}

async fn get_deployment(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let info = state.pipeline.get_deployment(&id).await?;
    Ok(ok(info))
}

async fn stop_deployment(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let info = state.pipeline.stop_deployment(&id).await?;
    Ok(ok(info))
}

/// Serve the API until `shutdown` is notified.
pub async fn run_http_server(
    bind_addr: SocketAddr,
    state: SharedState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Launchbay HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await?;

    info!("Launchbay HTTP server stopped");
    Ok(())
}
