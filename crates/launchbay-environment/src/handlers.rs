// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared state behind the HTTP handlers.

use serde::Serialize;
use std::sync::Arc;

use crate::pipeline::BuildDeployPipeline;
use crate::store::PostgresStore;

/// Shared state for HTTP handlers.
pub struct HandlerState {
    /// Pipeline every project operation goes through.
    pub pipeline: Arc<BuildDeployPipeline>,
    /// Store checked by the health endpoint; `None` when running on memory.
    pub store: Option<PostgresStore>,
    /// When the server started (for uptime calculation).
    pub start_time: std::time::Instant,
    /// Server version string.
    pub version: String,
}

impl HandlerState {
    /// Create handler state.
    pub fn new(pipeline: Arc<BuildDeployPipeline>, store: Option<PostgresStore>) -> Self {
        Self {
            pipeline,
            store,
            start_time: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Milliseconds since start.
    pub fn uptime_ms(&self) -> i64 {
        i64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    /// Whether the server is healthy (database reachable).
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Server uptime in milliseconds.
    pub uptime_ms: i64,
    /// Processes currently supervised.
    pub live_processes: usize,
}

/// Report health, probing the database if there is one.
pub async fn handle_health_check(state: &HandlerState) -> HealthCheckResponse {
    let healthy = match &state.store {
        Some(store) => store.health_check().await.unwrap_or(false),
        None => true,
    };

    HealthCheckResponse {
        healthy,
        version: state.version.clone(),
        uptime_ms: state.uptime_ms(),
        live_processes: state.pipeline.supervisor().registry().len(),
    }
}
