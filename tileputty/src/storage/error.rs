//! Error types for object storage operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by an [`ObjectStore`](super::ObjectStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The object does not exist.
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// A conditional write lost against a concurrent writer.
    #[error("conditional write rejected for s3://{bucket}/{key}: object was modified")]
    PreconditionFailed { bucket: String, key: String },

    /// The local file to upload could not be read.
    #[error("failed to read local file {}: {message}", path.display())]
    LocalRead { path: PathBuf, message: String },

    /// The request failed in transport or was rejected by the service.
    #[error("request for s3://{bucket}/{key} failed: {message}")]
    Request {
        bucket: String,
        key: String,
        message: String,
        retryable: bool,
    },
}

impl StorageError {
    /// Returns true if repeating the same request may succeed.
    ///
    /// Timeouts, connection failures, throttling and 5xx responses are
    /// transient. Missing objects, lost preconditions, local read failures
    /// and 4xx rejections are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Request { retryable: true, .. })
    }

    /// Returns true if the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
