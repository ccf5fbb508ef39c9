//! Object storage transport.
//!
//! The [`ObjectStore`] trait is the only way the pipeline talks to remote
//! storage. A store is constructed once and shared read-only across all
//! upload workers as an `Arc<dyn ObjectStore>`.
//!
//! # Implementations
//!
//! - [`S3Store`] - AWS S3 and S3-compatible endpoints via the AWS SDK
//! - [`MemoryStore`] - in-process store with failure injection, for tests
//!   and dry runs
//!
//! Stores make exactly one request per call. Retrying transient failures is
//! the caller's job (see [`crate::upload::RetryPolicy`]).

mod error;
mod memory;
mod s3;

use std::path::Path;

use async_trait::async_trait;

use crate::metadata::ObjectMetadata;

pub use error::StorageError;
pub use memory::{MemoryObject, MemoryStore};
pub use s3::S3Store;

/// An object read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object body.
    pub body: Vec<u8>,

    /// Version token for conditional writes, if the store provides one.
    pub etag: Option<String>,
}

/// Precondition for a write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteCondition {
    /// Overwrite whatever is stored.
    #[default]
    Unconditional,

    /// Write only if the stored object still has this ETag.
    IfMatch(String),

    /// Write only if no object exists at the key.
    IfAbsent,
}

/// Remote object storage.
///
/// All implementations must be `Send + Sync` for use across worker tasks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file, overwriting any existing object at the key.
    ///
    /// The metadata is attached as `Content-Type`, `Content-Encoding` and
    /// `Cache-Control` headers.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError>;

    /// Fetch an object.
    ///
    /// Returns [`StorageError::NotFound`] if no object exists at the key.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError>;

    /// Write bytes to a key, subject to a precondition.
    ///
    /// Returns [`StorageError::PreconditionFailed`] if the condition does not
    /// hold at write time.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        condition: WriteCondition,
    ) -> Result<(), StorageError>;
}
