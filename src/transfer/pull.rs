// src/transfer/pull.rs

//! Pull: install a release and verify every binary against meta.yml

use super::io::{Bandwidth, TransferWriter};
use super::{Transfer, run_jobs};
use crate::checksum;
use crate::error::{Error, Result};
use crate::manifest::BinaryRecord;
use crate::release::{self, timestamp::ReleaseTimestamp};
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Options for [`Transfer::pull`]
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Release to install; defaults to the latest one
    pub timestamp: Option<ReleaseTimestamp>,
    /// Overall download rate limit
    pub max_bandwidth: Option<Bandwidth>,
    /// Concurrent download workers (0 or 1 = sequential)
    pub jobs: usize,
}

/// What a pull installed
#[derive(Debug, Clone, Serialize)]
pub struct PullReport {
    pub project: String,
    pub timestamp: ReleaseTimestamp,
    pub installed: Vec<PathBuf>,
}

impl Transfer {
    /// Install every binary of a release into `install_dir`
    ///
    /// Each binary is downloaded into a temporary file next to its
    /// destination and only renamed into place after its checksum matched.
    /// When one binary fails, its temporary file is removed and the pull
    /// stops; binaries installed before it stay installed.
    pub fn pull(
        &self,
        project: &str,
        install_dir: &Path,
        options: &PullOptions,
    ) -> Result<PullReport> {
        let project = release::normalize_project(project)?;
        let manifest = self
            .find_manifest(&project)?
            .ok_or_else(|| Error::ManifestNotFound(project.clone()))?;
        let release = self.release_from(&project, &manifest, options.timestamp.as_ref())?;
        // Names come from meta.yml and end up as paths below install_dir
        for record in &release.binaries {
            record.validate()?;
        }

        info!(
            "Pulling {} binaries of {} release {} into {}",
            release.binaries.len(),
            project,
            release.timestamp,
            install_dir.display()
        );

        fs::create_dir_all(install_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create directory {}: {}",
                install_dir.display(),
                e
            ))
        })?;

        let streams = options.jobs.clamp(1, release.binaries.len());
        let limit = options.max_bandwidth.map(|bw| bw.split(streams));

        let installed = run_jobs(options.jobs, &release.binaries, |record| {
            self.pull_binary(&project, install_dir, record, limit)
        })?;

        info!("Installed {} binaries into {}", installed.len(), install_dir.display());
        Ok(PullReport {
            project,
            timestamp: release.timestamp,
            installed,
        })
    }

    fn pull_binary(
        &self,
        project: &str,
        install_dir: &Path,
        record: &BinaryRecord,
        limit: Option<Bandwidth>,
    ) -> Result<PathBuf> {
        let timestamp = record.timestamp.as_ref().ok_or_else(|| {
            Error::SerializationError(format!("meta.yml entry {} has no timestamp", record.name))
        })?;
        let key = release::binary_key(project, timestamp, &record.name);
        self.cancel.check(&format!("download {}", key))?;

        let dest = install_dir.join(&record.name);
        // Removed on drop unless persisted
        let mut staging = NamedTempFile::new_in(install_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create temporary file in {}: {}",
                install_dir.display(),
                e
            ))
        })?;

        {
            let mut writer =
                TransferWriter::new(BufWriter::new(staging.as_file()), self.cancel.clone())
                    .with_limit(limit);
            self.store
                .download_stream(&key, &mut writer)
                .map_err(|e| self.transfer_error(e, &format!("download {}", key)))?;
            writer.flush().map_err(|e| {
                Error::IoError(format!("Failed to write {}: {}", dest.display(), e))
            })?;
        }

        staging
            .as_file_mut()
            .rewind()
            .map_err(|e| Error::IoError(format!("Failed to rewind {}: {}", dest.display(), e)))?;

        if let Err(e) =
            checksum::verify(&record.name, &record.checksum, BufReader::new(staging.as_file()))
        {
            warn!("Discarding {}: {}", record.name, e);
            return Err(e);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staging
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o755))
                .map_err(|e| {
                    Error::IoError(format!(
                        "Failed to set permissions on {}: {}",
                        dest.display(),
                        e
                    ))
                })?;
        }

        staging.persist(&dest).map_err(|e| {
            Error::IoError(format!("Failed to install {}: {}", dest.display(), e.error))
        })?;

        info!("Installed {} ({})", dest.display(), record.short_checksum());
        Ok(dest)
    }
}
