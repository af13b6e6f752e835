// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for launchbay-environment.
//!
//! Every variant maps to a stable machine-readable kind (see [`Error::kind`])
//! which is what callers receive alongside the human-readable message.

use thiserror::Error;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A required setting is missing at the point it is first needed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Project or deployment does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What was looked up ("Project", "Deployment").
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// No free port in the configured range.
    #[error("No free port available in range {start}-{end}")]
    ResourceExhausted {
        /// First port of the searched range.
        start: u16,
        /// Last port of the searched range (inclusive).
        end: u16,
    },

    /// Dependency install or build step exited non-zero.
    #[error("{step} failed with exit code {exit_code:?}: {stderr_tail}")]
    BuildFailed {
        /// Which step failed ("install", "build").
        step: &'static str,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Last lines of captured stderr.
        stderr_tail: String,
    },

    /// Administrative database operation failed.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runner (process execution) failed.
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),
}

impl Error {
    /// Shorthand for a missing project.
    pub fn project_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            entity: "Project",
            id: id.into(),
        }
    }

    /// Shorthand for a missing deployment record.
    pub fn deployment_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            entity: "Deployment",
            id: id.into(),
        }
    }

    /// Stable machine-readable kind of this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::ResourceExhausted { .. } => "resource_exhausted",
            Error::BuildFailed { .. } => "build_failed",
            Error::Provisioning(_) => "provisioning_failed",
            Error::Config(_) | Error::Configuration(_) => "configuration_error",
            Error::Runner(crate::runner::RunnerError::SpawnFailed(_)) => "spawn_failed",
            Error::Database(_) | Error::Io(_) | Error::Json(_) | Error::Runner(_) => "internal",
        }
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;
