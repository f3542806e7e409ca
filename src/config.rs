// src/config.rs

//! Endpoint configuration
//!
//! binrep keeps no global state: the CLI builds a [`Config`] from its flags
//! (and `BINREP_BACKEND_ENDPOINT`) and hands the resulting store to the
//! orchestrator explicitly.

use crate::error::{Error, Result};
use crate::storage::{FsStore, MemoryStore, ObjectStore};
use crate::transfer::CancelToken;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Environment variable consulted when `--endpoint` is not given
pub const ENDPOINT_ENV: &str = "BINREP_BACKEND_ENDPOINT";

/// Where the repository lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A directory, local or mounted: `file:///srv/binrep` or `/srv/binrep`
    Filesystem(PathBuf),
    /// Process-local store, gone on exit: `memory://`
    ///
    /// For tests and embedding only. Separate CLI invocations never share it.
    Memory,
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "BackendEndpoint required. Use --endpoint or {}",
                ENDPOINT_ENV
            )));
        }

        if let Some(path) = endpoint.strip_prefix("file://") {
            if path.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "Endpoint {} has no path",
                    endpoint
                )));
            }
            return Ok(Endpoint::Filesystem(PathBuf::from(path)));
        }

        if endpoint == "memory://" {
            return Ok(Endpoint::Memory);
        }

        if let Some((scheme, _)) = endpoint.split_once("://") {
            return Err(Error::InvalidArgument(format!(
                "Unsupported endpoint scheme '{}' in {}",
                scheme, endpoint
            )));
        }

        Ok(Endpoint::Filesystem(PathBuf::from(endpoint)))
    }
}

/// Process configuration resolved from the command line
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    /// Deadline for the whole operation
    pub timeout: Option<Duration>,
}

impl Config {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::parse(endpoint)?,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open the object store the endpoint points at
    pub fn open_store(&self) -> Result<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match &self.endpoint {
            Endpoint::Filesystem(root) => {
                if !root.is_dir() {
                    return Err(Error::InvalidArgument(format!(
                        "Repository directory {} does not exist",
                        root.display()
                    )));
                }
                Arc::new(FsStore::new(root.clone()))
            }
            Endpoint::Memory => Arc::new(MemoryStore::new()),
        };
        debug!("Using object store {}", store.describe());
        Ok(store)
    }

    /// Cancel token honouring the configured deadline
    pub fn cancel_token(&self) -> CancelToken {
        match self.timeout {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        }
    }
}
