// src/release/retention.rs

//! Release retention
//!
//! Deletes payloads of old release directories. A release older than the
//! kept window survives while a kept release still installs one of its
//! payloads (see `Manifest::release_view`). meta.yml is never modified, so
//! the full publication history stays readable after pruning.

use super::timestamp::ReleaseTimestamp;
use super::{ReleaseResolver, manifest_key, normalize_project, release_prefix};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::storage::ObjectStore;
use crate::transfer::CancelToken;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of releases `push` keeps unless told otherwise
pub const DEFAULT_KEEP_RELEASES: usize = 5;

/// Remove all but the newest `keep` releases of a project
///
/// Returns the timestamps of the removed releases, oldest first.
/// `keep == 0` disables pruning.
pub fn prune_releases(
    store: &Arc<dyn ObjectStore>,
    project: &str,
    keep: usize,
    cancel: &CancelToken,
) -> Result<Vec<ReleaseTimestamp>> {
    if keep == 0 {
        return Ok(Vec::new());
    }

    let project = normalize_project(project)?;
    let timestamps = ReleaseResolver::new(Arc::clone(store)).timestamps(&project)?;
    if timestamps.len() <= keep {
        debug!("{} has {} releases, nothing to prune", project, timestamps.len());
        return Ok(Vec::new());
    }

    let manifest = match store.get(&manifest_key(&project)) {
        Ok(data) => Manifest::from_yaml(&data)?,
        Err(Error::ObjectNotFound(_)) => Manifest::default(),
        Err(e) => return Err(e),
    };

    let (old, kept) = timestamps.split_at(timestamps.len() - keep);
    let referenced: BTreeSet<&ReleaseTimestamp> = kept
        .iter()
        .flat_map(|ts| manifest.release_view(ts))
        .filter_map(|record| record.timestamp.as_ref())
        .collect();

    let mut removed = Vec::new();
    for ts in old {
        if referenced.contains(ts) {
            debug!("Keeping {} release {}: still referenced", project, ts);
            continue;
        }
        cancel.check("prune releases")?;

        let prefix = release_prefix(&project, ts);
        for key in store.list(&prefix, "")?.keys {
            store.delete(&key)?;
        }
        info!("Pruned {} release {}", project, ts);
        removed.push(ts.clone());
    }

    Ok(removed)
}
