//! Summary of a publish run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::manifest::LatestManifest;
use crate::upload::{UploadError, UploadOutcome};

/// A file that could not be uploaded.
#[derive(Debug, Clone)]
pub struct FailedUpload {
    /// Local file.
    pub path: PathBuf,
    /// Remote key, if one could be computed.
    pub key: Option<String>,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error from the last attempt.
    pub error: UploadError,
}

impl FailedUpload {
    /// Build from a failed outcome; `None` if the outcome succeeded.
    pub fn from_outcome(outcome: UploadOutcome) -> Option<Self> {
        match outcome.result {
            Ok(()) => None,
            Err(error) => Some(Self {
                path: outcome.path,
                key: outcome.key,
                attempts: outcome.attempts,
                error,
            }),
        }
    }
}

/// Result of [`TilePublisher::publish`](super::TilePublisher::publish).
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// Destination as `s3://bucket/dataset/version/implementation`.
    pub destination: String,
    /// Number of files uploaded successfully.
    pub files_uploaded: usize,
    /// Files that failed after retries.
    pub failures: Vec<FailedUpload>,
    /// Whether the run was cancelled before the queue drained.
    pub cancelled: bool,
    /// The manifest as written, if it was updated.
    pub manifest: Option<LatestManifest>,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Total run time.
    pub elapsed: Duration,
}

impl PublishReport {
    /// Number of files processed, uploaded or failed.
    pub fn files_processed(&self) -> usize {
        self.files_uploaded + self.failures.len()
    }

    /// Returns true if at least one file failed to upload.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Returns true if the manifest was updated.
    pub fn manifest_updated(&self) -> bool {
        self.manifest.is_some()
    }

    /// Returns true if every file was uploaded and the run was not cancelled.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

impl fmt::Display for PublishReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploaded {} of {} files to {} in {:.1}s",
            self.files_uploaded,
            self.files_processed(),
            self.destination,
            self.elapsed.as_secs_f64()
        )?;
        if self.has_failures() {
            write!(f, ", {} failed", self.failures.len())?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        if self.manifest_updated() {
            write!(f, ", latest manifest updated")?;
        }
        Ok(())
    }
}
