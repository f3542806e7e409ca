// src/release/mod.rs

//! Release layout and discovery
//!
//! A project's objects are laid out as:
//!
//! ```text
//! <project>/meta.yml                  manifest (append-only history)
//! <project>/<timestamp>/<binary>      payloads uploaded by one push
//! ```
//!
//! The resolver finds release directories by listing the project prefix.

pub mod retention;
pub mod timestamp;

use crate::error::{Error, Result};
use crate::manifest::MANIFEST_FILE_NAME;
use crate::storage::{self, DELIMITER, ObjectStore};
use std::sync::Arc;
use timestamp::ReleaseTimestamp;
use tracing::{debug, warn};

/// How deep `projects()` descends looking for manifests
const MAX_PROJECT_DEPTH: usize = 8;

/// Normalize a project path (`host/user/project`)
///
/// Leading and trailing slashes are dropped; empty, `.` and `..` segments
/// are rejected.
pub fn normalize_project(project: &str) -> Result<String> {
    let trimmed = project.trim_matches('/');
    if trimmed.is_empty()
        || trimmed
            .split('/')
            .any(|s| s.is_empty() || s == "." || s == "..")
    {
        return Err(Error::InvalidArgument(format!(
            "Invalid project name '{}'",
            project
        )));
    }
    Ok(trimmed.to_string())
}

pub fn project_prefix(project: &str) -> String {
    format!("{}{}", project, DELIMITER)
}

pub fn manifest_key(project: &str) -> String {
    storage::join_key(&[project, MANIFEST_FILE_NAME])
}

pub fn release_prefix(project: &str, timestamp: &ReleaseTimestamp) -> String {
    format!("{}{}", storage::join_key(&[project, timestamp.as_str()]), DELIMITER)
}

pub fn binary_key(project: &str, timestamp: &ReleaseTimestamp, name: &str) -> String {
    storage::join_key(&[project, timestamp.as_str(), name])
}

/// Release Directory Resolver
pub struct ReleaseResolver {
    store: Arc<dyn ObjectStore>,
}

impl ReleaseResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// All release timestamps of a project, oldest first
    ///
    /// Fails with `ProjectNotFound` when the project has no release
    /// directories at all.
    pub fn timestamps(&self, project: &str) -> Result<Vec<ReleaseTimestamp>> {
        let project = normalize_project(project)?;
        let prefix = project_prefix(&project);
        let listing = self.store.list(&prefix, DELIMITER).map_err(|e| {
            Error::StorageError(format!(
                "Failed to list objects ({}{}): {}",
                self.store.describe(),
                prefix,
                e
            ))
        })?;

        if listing.common_prefixes.is_empty() {
            return Err(Error::ProjectNotFound(project));
        }

        let mut timestamps = Vec::with_capacity(listing.common_prefixes.len());
        for cp in &listing.common_prefixes {
            match ReleaseTimestamp::parse(storage::base_name(cp)) {
                Ok(ts) => timestamps.push(ts),
                Err(e) => warn!("Ignoring non-release directory {}: {}", cp, e),
            }
        }

        if timestamps.is_empty() {
            return Err(Error::ProjectNotFound(project));
        }

        timestamps.sort();
        debug!("Found {} releases for {}", timestamps.len(), project);
        Ok(timestamps)
    }

    /// Most recent release timestamp of a project
    pub fn latest_timestamp(&self, project: &str) -> Result<ReleaseTimestamp> {
        let mut timestamps = self.timestamps(project)?;
        // Non-empty on success
        timestamps
            .pop()
            .ok_or_else(|| Error::ProjectNotFound(project.to_string()))
    }

    /// Every project path that holds a manifest, sorted
    pub fn projects(&self) -> Result<Vec<String>> {
        let mut projects = Vec::new();
        self.walk_projects("", 0, &mut projects)?;
        projects.sort();
        Ok(projects)
    }

    fn walk_projects(&self, prefix: &str, depth: usize, out: &mut Vec<String>) -> Result<()> {
        if depth > MAX_PROJECT_DEPTH {
            return Ok(());
        }

        let listing = self.store.list(prefix, DELIMITER)?;
        if listing
            .keys
            .iter()
            .any(|k| storage::base_name(k) == MANIFEST_FILE_NAME)
        {
            out.push(prefix.trim_end_matches('/').to_string());
        }

        for cp in &listing.common_prefixes {
            // Release directories only hold payloads
            if ReleaseTimestamp::parse(storage::base_name(cp)).is_ok() {
                continue;
            }
            self.walk_projects(cp, depth + 1, out)?;
        }
        Ok(())
    }
}
