// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for launchbay-environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::runner::CommandSpec;

/// A program plus its fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed verbatim (no shell).
    pub args: Vec<String>,
}

impl CommandTemplate {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Bind the template to a working directory.
    pub fn spec(&self, working_dir: impl Into<PathBuf>) -> CommandSpec {
        CommandSpec::new(self.program.clone(), self.args.clone(), working_dir)
    }
}

/// Commands used to install, build and run a project.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Materializes the dependency tree.
    pub install: CommandTemplate,
    /// Development server used for previews.
    pub preview: CommandTemplate,
    /// Production build step.
    pub build: CommandTemplate,
    /// Production server.
    pub production: CommandTemplate,
}

impl Toolchain {
    /// npm-based toolchain using the given binary.
    pub fn npm(bin: &str) -> Self {
        Self {
            install: CommandTemplate::new(bin, &["install"]),
            preview: CommandTemplate::new(bin, &["run", "dev"]),
            build: CommandTemplate::new(bin, &["run", "build"]),
            production: CommandTemplate::new(bin, &["run", "start"]),
        }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::npm("npm")
    }
}

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL for Launchbay's own records (projects, services, deployments)
    pub database_url: String,
    /// Administrative connection used to create per-project roles and databases.
    /// Only required once provisioning is actually attempted.
    pub admin_database_url: Option<String>,
    /// Base domain for externally reachable deployment URLs
    pub apps_base_domain: Option<String>,
    /// HTTP API address
    pub http_addr: SocketAddr,
    /// Default parent directory for project working trees
    pub projects_dir: PathBuf,
    /// Inclusive port range handed out to child processes
    pub port_range: (u16, u16),
    /// Host used when building preview/internal URLs
    pub preview_host: String,
    /// Commands for install/build/run
    pub toolchain: Toolchain,
    /// How long deploy waits for the production process to leave `starting`
    pub deploy_status_wait: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("LAUNCHBAY_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("LAUNCHBAY_DATABASE_URL"))?;

        let admin_database_url = non_blank_var("DB_ADMIN_URL");
        let apps_base_domain = non_blank_var("APPS_BASE_DOMAIN");

        let port: u16 = std::env::var("LAUNCHBAY_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort("LAUNCHBAY_HTTP_PORT"))?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let projects_dir = PathBuf::from(
            std::env::var("LAUNCHBAY_PROJECTS_DIR").unwrap_or_else(|_| "projects".to_string()),
        );

        let range_start = parse_port_var("LAUNCHBAY_PORT_RANGE_START", 3100)?;
        let range_end = parse_port_var("LAUNCHBAY_PORT_RANGE_END", 3999)?;
        if range_start > range_end {
            return Err(ConfigError::InvalidPortRange(range_start, range_end));
        }

        let preview_host =
            std::env::var("LAUNCHBAY_PREVIEW_HOST").unwrap_or_else(|_| "localhost".to_string());

        let npm_bin = std::env::var("LAUNCHBAY_NPM_BIN").unwrap_or_else(|_| "npm".to_string());

        let deploy_status_wait = Duration::from_millis(
            std::env::var("LAUNCHBAY_DEPLOY_STATUS_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3000),
        );

        Ok(Self {
            database_url,
            admin_database_url,
            apps_base_domain,
            http_addr,
            projects_dir,
            port_range: (range_start, range_end),
            preview_host,
            toolchain: Toolchain::npm(&npm_bin),
            deploy_status_wait,
        })
    }
}

fn non_blank_var(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_port_var(var: &'static str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(var)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A port variable does not hold a valid port number.
    #[error("Invalid port number in {0}")]
    InvalidPort(&'static str),
    /// Port range start is above its end.
    #[error("Invalid port range {0}-{1}")]
    InvalidPortRange(u16, u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npm_toolchain_uses_given_binary() {
        let toolchain = Toolchain::npm("/opt/node/bin/npm");
        assert_eq!(toolchain.install.program, "/opt/node/bin/npm");
        assert_eq!(toolchain.install.args, vec!["install"]);
        assert_eq!(toolchain.preview.args, vec!["run", "dev"]);
        assert_eq!(toolchain.build.args, vec!["run", "build"]);
        assert_eq!(toolchain.production.args, vec!["run", "start"]);
    }

    #[test]
    fn test_template_binds_working_dir() {
        let spec = Toolchain::default().build.spec("/srv/p1");
        assert_eq!(spec.display(), "npm run build");
        assert_eq!(spec.working_dir, PathBuf::from("/srv/p1"));
        assert!(spec.env.is_empty());
    }
}
