// src/lib.rs

//! binrep: static binary repository manager
//!
//! Publishes versioned binaries to an object store and installs them on
//! target hosts, verifying every binary against its SHA-256 checksum.
//!
//! # Architecture
//!
//! - Releases: each push uploads its binaries under `<project>/<timestamp>/`
//! - Manifest: `<project>/meta.yml` is the append-only history of every push
//! - Integrity: pulls verify each binary before moving it into place
//! - Storage: all remote access goes through the `ObjectStore` trait

pub mod checksum;
pub mod config;
mod error;
pub mod manifest;
pub mod release;
pub mod storage;
pub mod transfer;

pub use error::{Error, Result};
