// src/storage/memory.rs

//! In-memory object store

use super::{Listing, ObjectStore};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};

/// Object store holding everything in a sorted map
///
/// Used by tests and `memory://` endpoints.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panic while holding the lock cannot leave a half-written map entry
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, prefix: &str, delimiter: &str) -> Result<Listing> {
        let objects = self.objects();
        let mut prefixes = BTreeSet::new();
        let mut keys = Vec::new();

        for key in objects.keys().filter(|k| k.starts_with(prefix)) {
            let rest = &key[prefix.len()..];
            match (!delimiter.is_empty()).then(|| rest.find(delimiter)).flatten() {
                Some(idx) => {
                    prefixes.insert(format!("{}{}", prefix, &rest[..idx + delimiter.len()]));
                }
                None => keys.push(key.clone()),
            }
        }

        Ok(Listing {
            common_prefixes: prefixes.into_iter().collect(),
            keys,
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.objects().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn upload_stream(&self, key: &str, reader: &mut dyn Read) -> Result<u64> {
        // Buffer first so a failed read never publishes a partial object
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| Error::IoError(format!("Failed to upload {}: {}", key, e)))?;
        let len = data.len() as u64;
        self.objects().insert(key.to_string(), data);
        Ok(len)
    }

    fn download_stream(&self, key: &str, writer: &mut dyn Write) -> Result<u64> {
        let data = self.get(key)?;
        writer
            .write_all(&data)
            .map_err(|e| Error::IoError(format!("Failed to download {}: {}", key, e)))?;
        Ok(data.len() as u64)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects().remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
