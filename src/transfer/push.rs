// src/transfer/push.rs

//! Push: publish local binaries as a new release

use super::io::TransferReader;
use super::{Transfer, run_jobs};
use crate::checksum;
use crate::error::{Error, Result};
use crate::manifest::{self, BinaryRecord};
use crate::release::{self, timestamp::ReleaseTimestamp};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A binary on the local filesystem, about to be pushed
#[derive(Debug, Clone)]
pub struct LocalBinary {
    /// Name it is published under
    pub name: String,
    pub path: PathBuf,
    /// Free-form version; empty when unspecified
    pub version: String,
}

impl LocalBinary {
    /// Publish `path` under its file name
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "Cannot derive a binary name from {}",
                    path.display()
                ))
            })?
            .to_string();

        Ok(Self {
            name,
            path,
            version: String::new(),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Options for [`Transfer::push`]
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Release to create; defaults to the current UTC time
    pub timestamp: Option<ReleaseTimestamp>,
    /// Upload even when an identical binary was published before
    pub force: bool,
    /// Concurrent checksum/upload workers (0 or 1 = sequential)
    pub jobs: usize,
}

/// What a push did
#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub project: String,
    pub timestamp: ReleaseTimestamp,
    /// Records appended to meta.yml
    pub uploaded: Vec<BinaryRecord>,
    /// Existing records matching an input binary byte for byte
    pub skipped: Vec<BinaryRecord>,
}

impl PushReport {
    /// True when nothing was uploaded and meta.yml was left alone
    pub fn is_noop(&self) -> bool {
        self.uploaded.is_empty()
    }
}

impl Transfer {
    /// Push binaries into a new release of `project`
    ///
    /// Payloads are uploaded to `<project>/<timestamp>/<name>` first;
    /// meta.yml is only updated once every upload finished. A failed upload
    /// therefore never leaves the manifest pointing at a missing payload,
    /// though payloads uploaded before the failure stay behind.
    pub fn push(
        &self,
        project: &str,
        binaries: &[LocalBinary],
        options: &PushOptions,
    ) -> Result<PushReport> {
        let project = release::normalize_project(project)?;
        validate_inputs(binaries)?;

        let records = run_jobs(options.jobs, binaries, |bin| {
            self.cancel.check("checksum")?;
            let sum = checksum::compute_file(&bin.path)?;
            debug!("{} -> {}", bin.path.display(), sum);
            Ok(BinaryRecord::new(bin.name.clone(), sum).with_version(bin.version.clone()))
        })?;

        let manifest = self.find_manifest(&project)?.unwrap_or_default();
        // Generated timestamps are newer than every release in meta.yml, so
        // only a caller-supplied one can collide with published records
        let timestamp = match &options.timestamp {
            Some(ts) => ts.clone(),
            None => ReleaseTimestamp::now_after(manifest.timestamps().last())?,
        };
        info!(
            "Pushing {} binaries to {} release {}",
            binaries.len(),
            project,
            timestamp
        );

        // What a pull of the new release would install without this push
        let current = manifest.release_view(&timestamp);

        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        for (bin, record) in binaries.iter().zip(records) {
            if let Some(existing) = manifest.find_in_release(&record.name, &timestamp) {
                if existing.checksum != record.checksum {
                    return Err(Error::InvalidArgument(format!(
                        "Release {} of {} already contains a different {}",
                        timestamp, project, record.name
                    )));
                }
            }

            let installed = current.iter().find(|b| b.name == record.name);
            match installed {
                Some(existing) if existing.checksum == record.checksum => {
                    let same_release = existing.timestamp.as_ref() == Some(&timestamp);
                    if !options.force || same_release {
                        info!(
                            "Skipping {}: already current as of release {}",
                            record.name,
                            existing
                                .timestamp
                                .as_ref()
                                .map(|t| t.as_str())
                                .unwrap_or("-")
                        );
                        skipped.push((*existing).clone());
                        continue;
                    }
                }
                _ => {
                    if let Some(prior) = manifest.find(&record.name, &record.checksum) {
                        debug!(
                            "{} reverts to the payload of release {}",
                            record.name,
                            prior.timestamp.as_ref().map(|t| t.as_str()).unwrap_or("-")
                        );
                    }
                }
            }
            pending.push((bin, record));
        }

        if pending.is_empty() {
            info!("Nothing to push for {}", project);
            return Ok(PushReport {
                project,
                timestamp,
                uploaded: Vec::new(),
                skipped,
            });
        }

        let uploaded = run_jobs(options.jobs, &pending, |(bin, record)| {
            self.upload_binary(&project, &timestamp, &bin.path, record)
        })?;

        self.create_or_update_manifest(&project, uploaded.clone())?;

        info!(
            "Pushed {} binaries to {} release {}",
            uploaded.len(),
            project,
            timestamp
        );
        Ok(PushReport {
            project,
            timestamp,
            uploaded,
            skipped,
        })
    }

    /// Upload one payload and return its repository-facing record
    fn upload_binary(
        &self,
        project: &str,
        timestamp: &ReleaseTimestamp,
        path: &Path,
        record: &BinaryRecord,
    ) -> Result<BinaryRecord> {
        let key = release::binary_key(project, timestamp, &record.name);
        self.cancel.check(&format!("upload {}", key))?;

        let file = File::open(path)
            .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
        let mut reader = TransferReader::new(BufReader::new(file), self.cancel.clone());

        let size = self
            .store
            .upload_stream(&key, &mut reader)
            .map_err(|e| self.transfer_error(e, &format!("upload {}", key)))?;

        // The file may have changed between hashing and uploading
        let sent = reader.finish();
        if sent != record.checksum {
            return Err(Error::ChecksumMismatch {
                name: path.display().to_string(),
                expected: record.checksum.clone(),
                actual: sent,
            });
        }

        info!("Uploaded {} ({} bytes) to {}", record.name, size, key);
        Ok(record.stamped(timestamp))
    }
}

fn validate_inputs(binaries: &[LocalBinary]) -> Result<()> {
    if binaries.is_empty() {
        return Err(Error::InvalidArgument("No binaries to push".to_string()));
    }

    let mut seen = HashSet::new();
    for bin in binaries {
        manifest::validate_binary_name(&bin.name)?;
        if !seen.insert(bin.name.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "Binary name {} given more than once",
                bin.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::storage::{Listing, MemoryStore, ObjectStore};
    use std::io::{Read, Write};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ts(s: &str) -> ReleaseTimestamp {
        s.parse().unwrap()
    }

    fn write_binary(dir: &TempDir, name: &str, content: &[u8]) -> LocalBinary {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        LocalBinary::from_path(path).unwrap()
    }

    fn stored_manifest(store: &MemoryStore, project: &str) -> Manifest {
        Manifest::from_yaml(&store.get(&format!("{}/meta.yml", project)).unwrap()).unwrap()
    }

    fn options(stamp: &str, force: bool) -> PushOptions {
        PushOptions {
            timestamp: Some(ts(stamp)),
            force,
            jobs: 1,
        }
    }

    /// Store whose uploads fail for one binary name
    struct FailingUploads {
        inner: MemoryStore,
        fail_name: String,
    }

    impl ObjectStore for FailingUploads {
        fn list(&self, prefix: &str, delimiter: &str) -> Result<Listing> {
            self.inner.list(prefix, delimiter)
        }
        fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.inner.get(key)
        }
        fn put(&self, key: &str, data: &[u8]) -> Result<()> {
            self.inner.put(key, data)
        }
        fn upload_stream(&self, key: &str, reader: &mut dyn Read) -> Result<u64> {
            if key.ends_with(&format!("/{}", self.fail_name)) {
                return Err(Error::StorageError(format!("upload of {} refused", key)));
            }
            self.inner.upload_stream(key, reader)
        }
        fn download_stream(&self, key: &str, writer: &mut dyn Write) -> Result<u64> {
            self.inner.download_stream(key, writer)
        }
        fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key)
        }
        fn describe(&self) -> String {
            "failing://".to_string()
        }
    }

    #[test]
    fn test_first_push_creates_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let app = write_binary(&dir, "app", b"X");

        let report = transfer
            .push("github.com/yuuki/app", &[app], &options("20230101000000", false))
            .unwrap();

        assert_eq!(report.uploaded.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(
            store.get("github.com/yuuki/app/20230101000000/app").unwrap(),
            b"X"
        );

        let manifest = stored_manifest(&store, "github.com/yuuki/app");
        assert_eq!(manifest.binaries.len(), 1);
        assert_eq!(manifest.binaries[0].name, "app");
        assert_eq!(manifest.binaries[0].checksum, checksum::compute_bytes(b"X"));
        assert_eq!(manifest.binaries[0].timestamp, Some(ts("20230101000000")));
    }

    #[test]
    fn test_forced_push_of_new_content_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());

        let app = write_binary(&dir, "app", b"X");
        transfer.push("p", &[app], &options("20230101000000", false)).unwrap();
        let app = write_binary(&dir, "app", b"Y");
        transfer.push("p", &[app], &options("20230201000000", true)).unwrap();

        let manifest = stored_manifest(&store, "p");
        assert_eq!(manifest.binaries.len(), 2);
        assert!(manifest.binaries.iter().all(|b| b.name == "app"));
        assert_ne!(manifest.binaries[0].checksum, manifest.binaries[1].checksum);
        assert_eq!(store.get("p/20230201000000/app").unwrap(), b"Y");
    }

    #[test]
    fn test_identical_push_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let app = write_binary(&dir, "app", b"X");

        transfer.push("p", &[app.clone()], &options("20230101000000", false)).unwrap();
        let before = store.get("p/meta.yml").unwrap();

        let report = transfer.push("p", &[app], &options("20230201000000", false)).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].timestamp, Some(ts("20230101000000")));
        assert_eq!(store.get("p/meta.yml").unwrap(), before);
        assert!(!store.contains("p/20230201000000/app"));
    }

    #[test]
    fn test_partial_push_uploads_only_changed_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());

        let app = write_binary(&dir, "app", b"app-1");
        let cli = write_binary(&dir, "cli", b"cli-1");
        transfer
            .push("p", &[app, cli.clone()], &options("20230101000000", false))
            .unwrap();

        let app = write_binary(&dir, "app", b"app-2");
        let report = transfer
            .push("p", &[app, cli], &options("20230201000000", false))
            .unwrap();

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.uploaded[0].name, "app");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(stored_manifest(&store, "p").binaries.len(), 3);
        assert!(!store.contains("p/20230201000000/cli"));
    }

    #[test]
    fn test_failed_upload_leaves_manifest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FailingUploads {
            inner: MemoryStore::new(),
            fail_name: "cli".to_string(),
        });
        let transfer = Transfer::new(store.clone());

        let app = write_binary(&dir, "app", b"app-1");
        transfer.push("p", &[app], &options("20230101000000", false)).unwrap();
        let before = store.get("p/meta.yml").unwrap();

        let app = write_binary(&dir, "app", b"app-2");
        let cli = write_binary(&dir, "cli", b"cli-1");
        let result = transfer.push("p", &[app, cli], &options("20230201000000", false));

        assert!(matches!(result, Err(Error::StorageError(_))));
        assert_eq!(store.get("p/meta.yml").unwrap(), before);
        // Orphaned payload from the aborted release
        assert!(store.inner.contains("p/20230201000000/app"));
    }

    #[test]
    fn test_parallel_push() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let bins: Vec<LocalBinary> = (0..6)
            .map(|i| write_binary(&dir, &format!("bin{}", i), format!("content {}", i).as_bytes()))
            .collect();

        let opts = PushOptions {
            timestamp: Some(ts("20230101000000")),
            force: false,
            jobs: 3,
        };
        let report = transfer.push("p", &bins, &opts).unwrap();

        let names: Vec<&str> = report.uploaded.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["bin0", "bin1", "bin2", "bin3", "bin4", "bin5"]);
        assert_eq!(stored_manifest(&store, "p").binaries.len(), 6);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Transfer::new(Arc::new(MemoryStore::new()));
        let app = write_binary(&dir, "app", b"X");

        assert!(matches!(
            transfer.push("p", &[], &options("20230101000000", false)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            transfer.push("p", &[app.clone(), app.clone()], &options("20230101000000", false)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            transfer.push("p/../q", &[app], &options("20230101000000", false)),
            Err(Error::InvalidArgument(_))
        ));

        let missing = LocalBinary::from_path(dir.path().join("missing")).unwrap();
        assert!(matches!(
            transfer.push("p", &[missing], &options("20230101000000", false)),
            Err(Error::IoError(_))
        ));
    }

    #[test]
    fn test_refuses_to_overwrite_published_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());

        let app = write_binary(&dir, "app", b"X");
        transfer.push("p", &[app], &options("20230101000000", false)).unwrap();

        let app = write_binary(&dir, "app", b"Y");
        let result = transfer.push("p", &[app], &options("20230101000000", true));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(store.get("p/20230101000000/app").unwrap(), b"X");
    }

    #[test]
    fn test_forced_repush_into_same_release_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let app = write_binary(&dir, "app", b"X");

        transfer.push("p", &[app.clone()], &options("20230101000000", false)).unwrap();
        let report = transfer.push("p", &[app], &options("20230101000000", true)).unwrap();

        assert!(report.is_noop());
        assert_eq!(stored_manifest(&store, "p").binaries.len(), 1);
    }

    #[test]
    fn test_reverting_to_an_earlier_binary_publishes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());

        let x = write_binary(&dir, "app", b"X");
        transfer.push("p", &[x], &options("20230101000000", false)).unwrap();
        let y = write_binary(&dir, "app", b"Y");
        transfer.push("p", &[y], &options("20230201000000", false)).unwrap();
        let x = write_binary(&dir, "app", b"X");
        let report = transfer.push("p", &[x], &options("20230301000000", false)).unwrap();

        assert_eq!(report.uploaded.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(store.get("p/20230301000000/app").unwrap(), b"X");
        assert_eq!(stored_manifest(&store, "p").binaries.len(), 3);

        let latest = transfer.release("p", None).unwrap();
        assert_eq!(latest.timestamp, ts("20230301000000"));
        assert_eq!(latest.binaries[0].checksum, checksum::compute_bytes(b"X"));
    }

    #[test]
    fn test_forced_pushes_within_one_second_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let forced = PushOptions {
            timestamp: None,
            force: true,
            jobs: 1,
        };

        let x = write_binary(&dir, "app", b"X");
        let first = transfer.push("p", &[x], &forced).unwrap();
        let y = write_binary(&dir, "app", b"Y");
        let second = transfer.push("p", &[y], &forced).unwrap();

        assert!(second.timestamp > first.timestamp);
        let manifest = stored_manifest(&store, "p");
        assert_eq!(manifest.binaries.len(), 2);
        assert!(manifest.binaries.iter().all(|b| b.name == "app"));

        let latest = transfer.release("p", None).unwrap();
        assert_eq!(latest.timestamp, second.timestamp);
        assert_eq!(latest.binaries[0].checksum, checksum::compute_bytes(b"Y"));
    }

    #[test]
    fn test_skip_and_reupload_after_pruning() {
        use crate::release::retention::prune_releases;
        use crate::transfer::CancelToken;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());

        let app = write_binary(&dir, "app", b"app-1");
        let cli = write_binary(&dir, "cli", b"cli-1");
        transfer
            .push("p", &[app, cli.clone()], &options("20230101000000", false))
            .unwrap();
        let app = write_binary(&dir, "app", b"app-2");
        transfer.push("p", &[app], &options("20230201000000", false)).unwrap();
        let app = write_binary(&dir, "app", b"app-3");
        transfer.push("p", &[app], &options("20230301000000", false)).unwrap();

        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let removed = prune_releases(&dyn_store, "p", 1, &CancelToken::new()).unwrap();
        assert_eq!(removed, vec![ts("20230201000000")]);

        // cli is still current and its release survived pruning
        let app = write_binary(&dir, "app", b"app-2");
        let report = transfer
            .push("p", &[app, cli], &options("20230401000000", false))
            .unwrap();

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "cli");
        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(store.get("p/20230401000000/app").unwrap(), b"app-2");

        let latest = transfer.release("p", None).unwrap();
        for record in &latest.binaries {
            let stamp = record.timestamp.as_ref().unwrap();
            assert!(store.contains(&format!("p/{}/{}", stamp, record.name)));
        }
    }

    #[test]
    fn test_default_timestamp_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transfer = Transfer::new(store.clone());
        let app = write_binary(&dir, "app", b"X").with_version("1.4.0");

        let report = transfer.push("p", &[app], &PushOptions::default()).unwrap();
        let manifest = stored_manifest(&store, "p");
        assert_eq!(manifest.binaries[0].version, "1.4.0");
        assert_eq!(manifest.binaries[0].timestamp.as_ref(), Some(&report.timestamp));
    }

    #[test]
    fn test_cancelled_push_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cancel = crate::transfer::CancelToken::new();
        cancel.cancel();
        let transfer = Transfer::new(store.clone()).with_cancel(cancel);
        let app = write_binary(&dir, "app", b"X");

        let result = transfer.push("p", &[app], &options("20230101000000", false));
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(store.is_empty());
    }
}
