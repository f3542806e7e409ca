// src/storage/fs.rs

//! Directory-backed object store
//!
//! Maps keys onto paths below a root directory. Objects are written to a
//! temporary file in the target directory and renamed into place, so readers
//! never observe a partially written object.

use super::{DELIMITER, Listing, ObjectStore};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Prefix tempfile gives staging files; hidden from listings
const STAGING_PREFIX: &str = ".tmp";

/// Object store rooted at a local (or mounted) directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::InvalidArgument(format!("Invalid object key '{}'", key)));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Write an object through a staging file in its final directory
    fn write_object<F>(&self, key: &str, fill: F) -> Result<u64>
    where
        F: FnOnce(&mut File) -> io::Result<u64>,
    {
        let path = self.object_path(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;

        let mut staging = NamedTempFile::new_in(parent).map_err(|e| {
            Error::IoError(format!("Failed to create staging file in {}: {}", parent.display(), e))
        })?;
        let written = fill(staging.as_file_mut())
            .and_then(|n| staging.as_file_mut().sync_all().map(|_| n))
            .map_err(|e| Error::IoError(format!("Failed to write {}: {}", key, e)))?;

        staging.persist(&path).map_err(|e| {
            Error::IoError(format!("Failed to move object into {}: {}", path.display(), e.error))
        })?;

        debug!("Stored {} ({} bytes)", key, written);
        Ok(written)
    }

    fn collect_keys(dir: &Path, key_prefix: &str, keys: &mut Vec<String>) -> Result<()> {
        for (name, is_dir) in read_dir_sorted(dir)? {
            let key = format!("{}{}", key_prefix, name);
            if is_dir {
                Self::collect_keys(&dir.join(&name), &format!("{}{}", key, DELIMITER), keys)?;
            } else {
                keys.push(key);
            }
        }
        Ok(())
    }
}

/// Directory entries as (name, is_dir), sorted, without staging files.
/// A missing directory lists as empty.
fn read_dir_sorted(dir: &Path) -> Result<Vec<(String, bool)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::IoError(format!("Failed to list {}: {}", dir.display(), e)));
        }
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::IoError(format!("Failed to list {}: {}", dir.display(), e)))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(STAGING_PREFIX) {
            continue;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        out.push((name, is_dir));
    }
    out.sort();
    Ok(out)
}

impl ObjectStore for FsStore {
    fn list(&self, prefix: &str, delimiter: &str) -> Result<Listing> {
        if !delimiter.is_empty() && delimiter != DELIMITER {
            return Err(Error::InvalidArgument(format!(
                "Unsupported delimiter '{}'",
                delimiter
            )));
        }

        // "a/b/ap" lists directory a/b, keeping entries that start with "ap"
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.object_path(dir_part.trim_end_matches('/'))?
        };

        let mut listing = Listing::default();
        for (name, is_dir) in read_dir_sorted(&dir)? {
            if !name.starts_with(name_prefix) {
                continue;
            }
            let key = format!("{}{}", dir_part, name);
            match (is_dir, delimiter.is_empty()) {
                (true, false) => listing.common_prefixes.push(format!("{}{}", key, DELIMITER)),
                (true, true) => Self::collect_keys(
                    &dir.join(&name),
                    &format!("{}{}", key, DELIMITER),
                    &mut listing.keys,
                )?,
                (false, _) => listing.keys.push(key),
            }
        }
        Ok(listing)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ObjectNotFound(key.to_string()),
            _ => Error::IoError(format!("Failed to read {}: {}", path.display(), e)),
        })
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.write_object(key, |file| file.write_all(data).map(|_| data.len() as u64))?;
        Ok(())
    }

    fn upload_stream(&self, key: &str, reader: &mut dyn Read) -> Result<u64> {
        self.write_object(key, |file| io::copy(reader, file))
    }

    fn download_stream(&self, key: &str, writer: &mut dyn Write) -> Result<u64> {
        let path = self.object_path(key)?;
        let mut file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ObjectNotFound(key.to_string()),
            _ => Error::IoError(format!("Failed to open {}: {}", path.display(), e)),
        })?;

        io::copy(&mut file, writer)
            .map_err(|e| Error::IoError(format!("Failed to download {}: {}", key, e)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::IoError(format!("Failed to delete {}: {}", path.display(), e)));
            }
        }

        // Drop emptied directories so they stop showing up as prefixes
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
