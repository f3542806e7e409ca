// src/transfer/mod.rs

//! Transfer orchestration
//!
//! This module provides functionality for:
//! - Reading and updating a project's manifest (read-modify-write)
//! - Resolving which binaries make up a release
//! - Pushing binaries into a new release (see [`push`])
//! - Pulling and verifying a release onto a host (see [`pull`])
//!
//! The manifest update is best-effort: concurrent pushes to the same project
//! race on meta.yml and the last writer wins.

pub mod io;
pub mod pull;
pub mod push;

pub use io::{Bandwidth, CancelToken};
pub use pull::{PullOptions, PullReport};
pub use push::{LocalBinary, PushOptions, PushReport};

use crate::error::{Error, Result};
use crate::manifest::{BinaryRecord, Manifest};
use crate::release::timestamp::ReleaseTimestamp;
use crate::release::{self, ReleaseResolver};
use crate::storage::ObjectStore;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A resolved release: its timestamp and the binaries it installs
#[derive(Debug, Clone, Serialize)]
pub struct Release {
    pub project: String,
    pub timestamp: ReleaseTimestamp,
    pub binaries: Vec<BinaryRecord>,
}

/// Transfer Orchestrator bound to one object store
pub struct Transfer {
    store: Arc<dyn ObjectStore>,
    resolver: ReleaseResolver,
    cancel: CancelToken,
}

impl Transfer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            resolver: ReleaseResolver::new(Arc::clone(&store)),
            store,
            cancel: CancelToken::new(),
        }
    }

    /// Use `cancel` to abort running transfers
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resolver(&self) -> &ReleaseResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Load a project's manifest; `None` when meta.yml does not exist
    pub fn find_manifest(&self, project: &str) -> Result<Option<Manifest>> {
        let key = release::manifest_key(project);
        let data = match self.store.get(&key) {
            Ok(data) => data,
            Err(Error::ObjectNotFound(_)) => return Ok(None),
            Err(e) => {
                return Err(Error::StorageError(format!(
                    "Failed to get {} from {}: {}",
                    key,
                    self.store.describe(),
                    e
                )));
            }
        };

        let manifest = Manifest::from_yaml(&data).map_err(|e| {
            Error::SerializationError(format!("{} ({}): {}", key, self.store.describe(), e))
        })?;
        debug!("Loaded {} with {} records", key, manifest.binaries.len());
        Ok(Some(manifest))
    }

    /// Append records to a project's manifest, creating it if missing
    ///
    /// The manifest is re-read right before writing so the window for a
    /// lost update is as small as the store allows.
    pub fn create_or_update_manifest(
        &self,
        project: &str,
        records: Vec<BinaryRecord>,
    ) -> Result<Manifest> {
        self.cancel.check("update meta.yml")?;

        let manifest = match self.find_manifest(project)? {
            Some(mut manifest) => {
                manifest.append(records);
                manifest
            }
            None => {
                info!("Creating meta.yml for {}", project);
                Manifest::new(records)
            }
        };

        let key = release::manifest_key(project);
        let data = manifest.to_yaml()?;
        self.store.put(&key, &data).map_err(|e| {
            Error::StorageError(format!(
                "Failed to put {} into {}: {}",
                key,
                self.store.describe(),
                e
            ))
        })?;

        info!("Updated {} ({} records)", key, manifest.binaries.len());
        Ok(manifest)
    }

    /// Resolve a release from the manifest
    ///
    /// Without a timestamp the latest release directory is used. A given
    /// timestamp must be one the manifest knows about.
    pub fn release(&self, project: &str, timestamp: Option<&ReleaseTimestamp>) -> Result<Release> {
        let project = release::normalize_project(project)?;
        let manifest = self
            .find_manifest(&project)?
            .ok_or_else(|| Error::ManifestNotFound(project.clone()))?;
        self.release_from(&project, &manifest, timestamp)
    }

    /// Timestamp `show` and `pull` would resolve to without an explicit one
    ///
    /// `None` when the project has no manifest or no published release yet.
    pub fn latest_release(&self, project: &str) -> Result<Option<ReleaseTimestamp>> {
        let project = release::normalize_project(project)?;
        let Some(manifest) = self.find_manifest(&project)? else {
            return Ok(None);
        };
        match self.release_from(&project, &manifest, None) {
            Ok(release) => Ok(Some(release.timestamp)),
            Err(Error::ProjectNotFound(_)) | Err(Error::ReleaseNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Turn a stream failure caused by the cancel token into `Error::Cancelled`
    fn transfer_error(&self, err: Error, operation: &str) -> Error {
        if io::is_cancelled_error(&err) || self.cancel.is_cancelled() {
            return Error::Cancelled(operation.to_string());
        }
        err
    }

    fn release_from(
        &self,
        project: &str,
        manifest: &Manifest,
        timestamp: Option<&ReleaseTimestamp>,
    ) -> Result<Release> {
        let timestamp = match timestamp {
            Some(ts) => {
                if !manifest.timestamps().contains(ts) {
                    return Err(Error::ReleaseNotFound {
                        project: project.to_string(),
                        timestamp: ts.to_string(),
                    });
                }
                ts.clone()
            }
            None => {
                let latest = self.resolver.latest_timestamp(project)?;
                // A newer directory without manifest records is left over
                // from an aborted push; it resolves to the release before it.
                let known = manifest.timestamps().range(..=latest.clone()).next_back().cloned();
                match known {
                    Some(ts) if ts != latest => {
                        debug!("Release directory {} is not in meta.yml, using {}", latest, ts);
                        ts
                    }
                    Some(ts) => ts,
                    None => latest,
                }
            }
        };

        let binaries: Vec<BinaryRecord> = manifest
            .release_view(&timestamp)
            .into_iter()
            .cloned()
            .collect();
        if binaries.is_empty() {
            return Err(Error::ReleaseNotFound {
                project: project.to_string(),
                timestamp: timestamp.to_string(),
            });
        }

        Ok(Release {
            project: project.to_string(),
            timestamp,
            binaries,
        })
    }
}

/// Run `job` over `items`, on a pool of `jobs` threads when `jobs > 1`
///
/// Results keep input order. On failure the error of the first failing item
/// (in input order) is returned; items already running are not interrupted.
pub(crate) fn run_jobs<T, R, F>(jobs: usize, items: &[T], job: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync + Send,
{
    if jobs <= 1 || items.len() <= 1 {
        return items.iter().map(&job).collect();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| Error::InvalidArgument(format!("Failed to start {} workers: {}", jobs, e)))?;

    let results: Vec<Result<R>> = pool.install(|| items.par_iter().map(&job).collect());
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::storage::MemoryStore;

    fn ts(s: &str) -> ReleaseTimestamp {
        s.parse().unwrap()
    }

    #[test]
    fn test_find_manifest_missing() {
        let transfer = Transfer::new(Arc::new(MemoryStore::new()));
        assert!(transfer.find_manifest("p").unwrap().is_none());
    }

    #[test]
    fn test_find_manifest_malformed() {
        let store = Arc::new(MemoryStore::new());
        store.put("p/meta.yml", b"binaries: [[[").unwrap();
        let transfer = Transfer::new(store);
        assert!(matches!(
            transfer.find_manifest("p"),
            Err(Error::SerializationError(_))
        ));
    }

    #[test]
    fn test_create_then_update_manifest() {
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let first = BinaryRecord::new("app".into(), checksum::compute_bytes(b"x"))
            .stamped(&ts("20230101000000"));
        let second = BinaryRecord::new("app".into(), checksum::compute_bytes(b"y"))
            .stamped(&ts("20230201000000"));

        transfer.create_or_update_manifest("p", vec![first.clone()]).unwrap();
        transfer.create_or_update_manifest("p", vec![second.clone()]).unwrap();

        let stored = Manifest::from_yaml(&store.get("p/meta.yml").unwrap()).unwrap();
        assert_eq!(stored.binaries, vec![first, second]);
    }

    #[test]
    fn test_release_resolution() {
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let record = BinaryRecord::new("app".into(), checksum::compute_bytes(b"x"))
            .stamped(&ts("20230101000000"));
        store.put("p/20230101000000/app", b"x").unwrap();
        transfer.create_or_update_manifest("p", vec![record.clone()]).unwrap();

        let latest = transfer.release("p", None).unwrap();
        assert_eq!(latest.timestamp, ts("20230101000000"));
        assert_eq!(latest.binaries, vec![record]);

        assert!(matches!(
            transfer.release("p", Some(&ts("20240101000000"))),
            Err(Error::ReleaseNotFound { .. })
        ));
        assert!(matches!(
            transfer.release("q", None),
            Err(Error::ManifestNotFound(_))
        ));
    }

    #[test]
    fn test_latest_release_ignores_aborted_push_directory() {
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let record = BinaryRecord::new("app".into(), checksum::compute_bytes(b"x"))
            .stamped(&ts("20230101000000"));
        store.put("p/20230101000000/app", b"x").unwrap();
        transfer.create_or_update_manifest("p", vec![record]).unwrap();
        // Payload of a push that never reached meta.yml
        store.put("p/20230201000000/app", b"y").unwrap();

        assert_eq!(
            transfer.latest_release("p").unwrap(),
            Some(ts("20230101000000"))
        );
        assert_eq!(transfer.release("p", None).unwrap().timestamp, ts("20230101000000"));
        assert_eq!(transfer.latest_release("missing").unwrap(), None);
    }

    #[test]
    fn test_run_jobs_keeps_order_and_first_error() {
        let items: Vec<u32> = (0..16).collect();
        let doubled = run_jobs(4, &items, |n| Ok(n * 2)).unwrap();
        assert_eq!(doubled, (0..16).map(|n| n * 2).collect::<Vec<_>>());

        let err = run_jobs(4, &items, |n| {
            if *n >= 5 {
                Err(Error::InvalidArgument(format!("item {}", n)))
            } else {
                Ok(*n)
            }
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: item 5");

        let sequential = run_jobs(1, &items, |n| Ok(*n)).unwrap();
        assert_eq!(sequential.len(), 16);
    }
}
