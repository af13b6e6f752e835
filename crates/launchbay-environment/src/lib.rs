// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launchbay Environment - Preview and Deployment Orchestration
//!
//! This crate runs user projects as live processes on a single host. For every
//! project it installs dependencies, builds, allocates a port, supervises the
//! development ("preview") and production ("deployment") processes, and
//! provisions a dedicated PostgreSQL role and database.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     HTTP API (axum, port 8080)                     │
//! └───────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Build & Deploy Pipeline                          │
//! │   provision DB ─► .env.production ─► install ─► build ─► start     │
//! └───────────────────────────────────────────────────────────────────┘
//!          │                     │                          │
//!          ▼                     ▼                          ▼
//! ┌─────────────────┐   ┌─────────────────┐      ┌───────────────────┐
//! │    Database     │   │     Process     │─────►│  Port Allocator   │
//! │   Provisioner   │   │   Supervisor    │      └───────────────────┘
//! └────────┬────────┘   └────────┬────────┘
//!          │                     │ spawn / SIGTERM
//!          ▼                     ▼
//! ┌─────────────────┐   ┌─────────────────┐
//! │ PostgreSQL      │   │ Child processes │
//! │ (admin + store) │   │ (npm run ...)   │
//! └─────────────────┘   └─────────────────┘
//! ```
//!
//! # Process Status State Machine
//!
//! ```text
//!        spawn              first output
//!   ──────────► STARTING ──────────────► RUNNING
//!                  │                        │
//!                  │ exit 0                 │ exit 0
//!                  ├──────────► STOPPED ◄───┤
//!                  │                        │
//!                  │ exit != 0 / signal     │ exit != 0 / signal
//!                  └──────────► ERROR ◄─────┘
//! ```
//!
//! A failed spawn yields ERROR directly. STOPPED and ERROR remove the record.
//!
//! # Configuration
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LAUNCHBAY_DATABASE_URL` | required |
//! | `DB_ADMIN_URL` | required once a database is provisioned |
//! | `APPS_BASE_DOMAIN` | unset |
//! | `LAUNCHBAY_HTTP_PORT` | `8080` |
//! | `LAUNCHBAY_PROJECTS_DIR` | `projects` |
//! | `LAUNCHBAY_PORT_RANGE_START` / `LAUNCHBAY_PORT_RANGE_END` | `3100` / `3999` |
//! | `LAUNCHBAY_PREVIEW_HOST` | `localhost` |
//! | `LAUNCHBAY_NPM_BIN` | `npm` |
//! | `LAUNCHBAY_DEPLOY_STATUS_WAIT_MS` | `3000` |

#![deny(missing_docs)]

/// Database migrations for launchbay-environment.
pub mod migrations;

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types.
pub mod error;

/// Port allocation for child processes.
pub mod ports;

/// Process execution backends (native, mock).
pub mod runner;

/// Live process registry and lifecycle.
pub mod supervisor;

/// Per-project database provisioning.
pub mod provisioner;

/// Subdomain and URL derivation for deployments.
pub mod deployment;

/// `.env` file editing.
pub mod env_file;

/// Preview and deploy orchestration.
pub mod pipeline;

/// Project, service and deployment records.
pub mod store;

/// Shared state for HTTP handlers.
pub mod handlers;

/// HTTP API.
pub mod server;

/// Embeddable runtime.
pub mod runtime;
