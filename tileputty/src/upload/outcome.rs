//! Per-file upload results.

use std::path::PathBuf;

use thiserror::Error;

use crate::key::KeyError;
use crate::storage::StorageError;

/// Why a single file was not uploaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// No remote key could be computed for the file.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The store rejected the upload, possibly after retries.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of processing one file from the tile cache.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Local file.
    pub path: PathBuf,

    /// Remote key, if one could be computed.
    pub key: Option<String>,

    /// Upload attempts made (0 when no request was sent).
    pub attempts: u32,

    /// Success, or the error that ended the last attempt.
    pub result: Result<(), UploadError>,
}

impl UploadOutcome {
    /// Returns true if the file was uploaded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Key for logging: the remote key, or the local path when there is none.
    pub fn display_key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_key_falls_back_to_path() {
        let outcome = UploadOutcome {
            path: PathBuf::from("/elsewhere/0.mvt"),
            key: None,
            attempts: 0,
            result: Err(UploadError::Key(KeyError::NoFileName(PathBuf::from(
                "/elsewhere/0.mvt",
            )))),
        };
        assert!(!outcome.is_success());
        assert_eq!(outcome.display_key(), "/elsewhere/0.mvt");
    }

    #[test]
    fn test_upload_error_is_transparent() {
        let err = UploadError::from(StorageError::NotFound {
            bucket: "b".to_string(),
            key: "k".to_string(),
        });
        assert_eq!(err.to_string(), "object not found: s3://b/k");
    }
}
