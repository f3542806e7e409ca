// src/error.rs

use thiserror::Error;

/// Core error types for binrep
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O errors with operation and path context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Content integrity violation
    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// No meta.yml stored for the project
    #[error("meta.yml not found for project {0}")]
    ManifestNotFound(String),

    /// No release directories stored for the project
    #[error("No such project: {0}")]
    ProjectNotFound(String),

    /// Requested release is not part of the project history
    #[error("Release {timestamp} not found for project {project}")]
    ReleaseNotFound { project: String, timestamp: String },

    /// Remote object does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Malformed or unserializable manifest
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Release timestamp not in YYYYMMDDHHMMSS form
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Remote store failure that is not a plain I/O error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Operation stopped by a cancel signal or deadline
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Result type alias using binrep's Error type
pub type Result<T> = std::result::Result<T, Error>;
