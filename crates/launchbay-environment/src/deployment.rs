// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment naming and caller-facing deployment view.

use serde::{Deserialize, Serialize};

use crate::store::DeploymentRecord;

const SUBDOMAIN_PREFIX: &str = "proj-";
const SUBDOMAIN_MAX_LEN: usize = 50;

/// Deployment as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    /// Owning project.
    pub project_id: String,
    /// Stable subdomain.
    pub subdomain: String,
    /// Port of the production process.
    pub port: u16,
    /// Process status (`starting`, `running`, `stopped`, `error`).
    pub status: String,
    /// Internal URL while a production process is registered.
    pub url: Option<String>,
    /// Public URL, when a base domain is configured.
    pub external_url: Option<String>,
}

impl DeploymentInfo {
    /// Build from a persisted record.
    pub fn from_record(
        record: &DeploymentRecord,
        url: Option<String>,
        apps_base_domain: Option<&str>,
    ) -> Self {
        Self {
            project_id: record.project_id.clone(),
            subdomain: record.subdomain.clone(),
            port: u16::try_from(record.port).unwrap_or_default(),
            status: record.status.clone(),
            url,
            external_url: build_external_url(&record.subdomain, apps_base_domain),
        }
    }
}

/// Deterministic subdomain for a project.
///
/// Lossy: distinct ids that differ only in unsafe characters or case map to
/// the same subdomain.
pub fn compute_project_subdomain(project_id: &str) -> String {
    let safe: String = project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let base = if safe.is_empty() { "app".to_string() } else { safe };
    format!("{}{}", SUBDOMAIN_PREFIX, base)
        .to_lowercase()
        .chars()
        .take(SUBDOMAIN_MAX_LEN)
        .collect()
}

/// `https://<subdomain>.<base>`, or `None` when no usable base domain is set.
pub fn build_external_url(subdomain: &str, apps_base_domain: Option<&str>) -> Option<String> {
    let base = apps_base_domain?.trim();
    let base = base
        .strip_prefix("https://")
        .or_else(|| base.strip_prefix("http://"))
        .unwrap_or(base)
        .trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    Some(format!("https://{}.{}", subdomain, base))
}
