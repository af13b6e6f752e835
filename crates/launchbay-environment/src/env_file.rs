// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `KEY=value` environment files.

use std::path::Path;
use tokio::fs;

use crate::error::Result;

/// File holding the production environment of a project.
pub const PRODUCTION_ENV_FILE: &str = ".env.production";

/// Set `key` in the env file at `path`, replacing any previous assignment.
///
/// Blank lines and every existing `key=` line are dropped, other lines are
/// kept in order and the new assignment is appended. A missing file is
/// created.
pub async fn upsert_env_var(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{}=", key);
    let mut lines: Vec<&str> = existing
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with(&prefix))
        .collect();
    let assignment = format!("{}{}", prefix, value);
    lines.push(&assignment);

    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path, content).await?;
    Ok(())
}
