// src/storage/mod.rs

//! Remote object store abstraction
//!
//! The transfer and release logic only needs a handful of capabilities from
//! a blob store: directory-style listing, whole-object get/put, streaming
//! upload/download for payloads, and delete for release pruning. Stores
//! implement [`ObjectStore`] and are handed to the orchestrator explicitly.
//!
//! Keys are `/`-separated and never start with `/`.

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::Result;
use std::io::{Read, Write};

/// Delimiter used for directory-style listings
pub const DELIMITER: &str = "/";

/// Result of a listing: sub-prefixes ("directories") and object keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Full prefixes ending with the delimiter, sorted
    pub common_prefixes: Vec<String>,
    /// Full object keys, sorted
    pub keys: Vec<String>,
}

/// Capability set required from a remote blob store
pub trait ObjectStore: Send + Sync {
    /// List keys under `prefix`
    ///
    /// With a non-empty `delimiter`, keys containing the delimiter after the
    /// prefix are rolled up into `common_prefixes`. With an empty delimiter
    /// every key under the prefix is returned.
    fn list(&self, prefix: &str, delimiter: &str) -> Result<Listing>;

    /// Fetch a whole object; `Error::ObjectNotFound` when absent
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store a whole object, replacing any previous content
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Store an object from a stream, returning the number of bytes written
    fn upload_stream(&self, key: &str, reader: &mut dyn Read) -> Result<u64>;

    /// Stream an object into `writer`; `Error::ObjectNotFound` when absent
    fn download_stream(&self, key: &str, writer: &mut dyn Write) -> Result<u64>;

    /// Remove an object; removing a missing object is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Human readable location for logs
    fn describe(&self) -> String;
}

/// Join key segments with the delimiter, ignoring stray slashes
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(DELIMITER)
}

/// Last segment of a key or prefix (`a/b/c/` -> `c`)
pub fn base_name(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}
