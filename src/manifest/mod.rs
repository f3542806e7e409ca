// src/manifest/mod.rs

//! Manifest (meta.yml) model
//!
//! A project's manifest is the append-only history of every binary pushed to
//! it. Each record keeps the release timestamp its payload was uploaded
//! under, so any past release can be reconstructed from the manifest alone.

use crate::checksum;
use crate::error::{Error, Result};
use crate::release::timestamp::ReleaseTimestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Object name of the manifest inside a project prefix
pub const MANIFEST_FILE_NAME: &str = "meta.yml";

/// One named, checksummed binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRecord {
    pub name: String,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Release the payload lives under; unset on client-built records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<ReleaseTimestamp>,
}

impl BinaryRecord {
    /// Create a client-side record (no release timestamp)
    pub fn new(name: String, checksum: String) -> Self {
        Self {
            name,
            checksum,
            version: String::new(),
            timestamp: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Repository-facing copy pinned to a release
    pub fn stamped(&self, timestamp: &ReleaseTimestamp) -> Self {
        Self {
            timestamp: Some(timestamp.clone()),
            ..self.clone()
        }
    }

    pub fn short_checksum(&self) -> &str {
        checksum::short(&self.checksum)
    }

    /// Check the name and checksum are usable as an object key and digest
    pub fn validate(&self) -> Result<()> {
        validate_binary_name(&self.name)?;
        if !checksum::is_valid(&self.checksum) {
            return Err(Error::InvalidArgument(format!(
                "Binary {} has malformed checksum '{}'",
                self.name, self.checksum
            )));
        }
        Ok(())
    }

    /// One-line summary: `name/version/short-checksum`
    pub fn inspect(&self) -> String {
        let version = if self.version.is_empty() {
            "-"
        } else {
            self.version.as_str()
        };
        format!("{}/{}/{}", self.name, version, self.short_checksum())
    }
}

/// Check that a binary name can be used as the last segment of an object key
pub fn validate_binary_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(Error::InvalidArgument(format!(
            "Invalid binary name '{}'",
            name
        )));
    }
    Ok(())
}

/// Every binary ever published to one project path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub binaries: Vec<BinaryRecord>,
}

impl Manifest {
    pub fn new(binaries: Vec<BinaryRecord>) -> Self {
        Self { binaries }
    }

    /// Add records to the end of the history
    ///
    /// Names are not deduplicated: the same binary name recurs once per
    /// release it was pushed in.
    pub fn append(&mut self, binaries: impl IntoIterator<Item = BinaryRecord>) {
        self.binaries.extend(binaries);
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| Error::SerializationError(format!("Failed to marshal meta.yml: {}", e)))
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(data)
            .map_err(|e| Error::SerializationError(format!("Failed to parse meta.yml: {}", e)))
    }

    /// Find a record with identical name and content
    pub fn find(&self, name: &str, checksum: &str) -> Option<&BinaryRecord> {
        self.binaries
            .iter()
            .find(|b| b.name == name && b.checksum == checksum)
    }

    /// Find the record of `name` published in exactly `timestamp`
    pub fn find_in_release(
        &self,
        name: &str,
        timestamp: &ReleaseTimestamp,
    ) -> Option<&BinaryRecord> {
        self.binaries
            .iter()
            .find(|b| b.name == name && b.timestamp.as_ref() == Some(timestamp))
    }

    /// Distinct release timestamps referenced by the history
    pub fn timestamps(&self) -> BTreeSet<ReleaseTimestamp> {
        self.binaries
            .iter()
            .filter_map(|b| b.timestamp.clone())
            .collect()
    }

    /// Binaries that make up the install set of a release
    ///
    /// For every name, the latest appended record published at or before
    /// `timestamp`. A push that only carried some binaries therefore still
    /// yields the complete set, with unchanged binaries coming from the
    /// release they were last uploaded in. Output order follows each name's
    /// first publication. Records without a timestamp are ignored.
    pub fn release_view(&self, timestamp: &ReleaseTimestamp) -> Vec<&BinaryRecord> {
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &BinaryRecord> = HashMap::new();

        for record in &self.binaries {
            let Some(ts) = &record.timestamp else {
                continue;
            };
            if ts > timestamp {
                continue;
            }

            let name = record.name.as_str();
            match latest.get(name) {
                None => order.push(name),
                Some(current) if current.timestamp.as_ref() > Some(ts) => continue,
                Some(_) => {}
            }
            latest.insert(name, record);
        }

        order.into_iter().filter_map(|name| latest.get(name).copied()).collect()
    }
}
