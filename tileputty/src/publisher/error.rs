//! Error types for the publisher module.

use thiserror::Error;

use crate::manifest::ManifestError;
use crate::walker::WalkError;

/// Result type for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// Errors that fail a whole publish run.
///
/// Individual upload failures are not errors at this level; they are
/// collected in the [`PublishReport`](super::PublishReport).
#[derive(Debug, Error)]
pub enum PublishError {
    /// The tile cache could not be traversed.
    #[error("tile cache traversal failed: {0}")]
    Walk(#[from] WalkError),

    /// The manifest could not be updated.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),
}
