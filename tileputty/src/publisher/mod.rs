//! Publish pipeline orchestration.
//!
//! [`TilePublisher`] wires the pieces of a run together:
//!
//! 1. Walk the tile cache on a blocking thread ([`TileWalker`])
//! 2. Feed the paths through a bounded queue into the [`UploadPool`]
//! 3. Log every outcome and collect failures
//! 4. Optionally update the latest manifest ([`ManifestUpdater`]) once
//!    the pool has drained
//!
//! A traversal error stops the walk and fails the run once the paths
//! already queued have been uploaded. A cancelled run never touches the
//! manifest.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tileputty::{PublishCoordinates, TilePublisher, UploadConfig};
//! use tileputty::storage::S3Store;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(S3Store::connect(&Default::default()).await);
//! let coordinates = PublishCoordinates::for_dataset("forest", "v1")?;
//! let report = TilePublisher::new(store, coordinates, UploadConfig::default())
//!     .with_update_latest(true)
//!     .publish("/data/tiles", CancellationToken::new())
//!     .await?;
//! println!("{}", report);
//! ```

mod error;
mod report;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::coordinates::PublishCoordinates;
use crate::key::KeyTranslator;
use crate::manifest::{ManifestUpdater, DEFAULT_MAX_CONFLICT_RETRIES};
use crate::storage::ObjectStore;
use crate::upload::{join_workers, UploadPool};
use crate::walker::{TileWalker, WalkError};

pub use error::{PublishError, PublishResult};
pub use report::{FailedUpload, PublishReport};

/// Publishes a tile cache to one set of coordinates.
pub struct TilePublisher {
    store: Arc<dyn ObjectStore>,
    coordinates: PublishCoordinates,
    upload: UploadConfig,
    update_latest: bool,
    manifest_conflict_retries: u32,
}

impl TilePublisher {
    /// Create a publisher.
    ///
    /// # Arguments
    ///
    /// * `store` - Transport shared by all workers and the manifest updater
    /// * `coordinates` - Destination bucket and key prefix
    /// * `upload` - Worker count, retry policy and key style
    pub fn new(
        store: Arc<dyn ObjectStore>,
        coordinates: PublishCoordinates,
        upload: UploadConfig,
    ) -> Self {
        Self {
            store,
            coordinates,
            upload,
            update_latest: false,
            manifest_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    /// Update the latest manifest after uploading.
    pub fn with_update_latest(mut self, enabled: bool) -> Self {
        self.update_latest = enabled;
        self
    }

    /// Set how many lost manifest writes are retried.
    pub fn with_manifest_conflict_retries(mut self, retries: u32) -> Self {
        self.manifest_conflict_retries = retries;
        self
    }

    /// Destination coordinates.
    pub fn coordinates(&self) -> &PublishCoordinates {
        &self.coordinates
    }

    /// Upload every file under `root` and optionally update the manifest.
    ///
    /// Per-file failures do not fail the run; they are listed in the
    /// returned report.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Walk`] if the root is invalid or traversal fails
    /// - [`PublishError::Manifest`] if the manifest update fails
    /// - [`PublishError::Task`] if a background task panics
    pub async fn publish(
        &self,
        root: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> PublishResult<PublishReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        let walker = TileWalker::new(root)?;
        let translator = KeyTranslator::new(walker.root(), &self.coordinates);
        let pool = UploadPool::new(
            Arc::clone(&self.store),
            &self.coordinates,
            translator,
            self.upload.clone(),
        );

        info!(
            root = %walker.root().display(),
            destination = %self.coordinates,
            workers = pool.workers(),
            "Publishing tile cache"
        );

        let (paths_tx, paths_rx) = mpsc::channel(pool.queue_depth());
        let producer = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || feed_paths(walker, paths_tx, cancel))
        };

        let (mut results, tasks) = pool.spawn(paths_rx, cancel.clone());

        let mut files_uploaded = 0usize;
        let mut failures = Vec::new();
        while let Some(outcome) = results.recv().await {
            match &outcome.result {
                Ok(()) => {
                    files_uploaded += 1;
                    info!(key = %outcome.display_key(), "Uploaded");
                }
                Err(e) => {
                    error!(
                        key = %outcome.display_key(),
                        attempts = outcome.attempts,
                        error = %e,
                        "Upload failed"
                    );
                }
            }
            failures.extend(FailedUpload::from_outcome(outcome));
        }

        let panicked = join_workers(tasks).await;
        let walked = producer
            .await
            .map_err(|e| PublishError::Task(format!("tile walker: {}", e)))?;
        let files_walked = walked?;
        if panicked > 0 {
            return Err(PublishError::Task(format!(
                "{} upload worker(s) panicked",
                panicked
            )));
        }

        let cancelled = cancel.is_cancelled();
        debug!(files_walked, files_uploaded, failed = failures.len(), "Upload queue drained");

        let manifest = if cancelled {
            warn!(
                files_uploaded,
                "Publish cancelled, remaining files were not uploaded"
            );
            None
        } else if self.update_latest {
            let updater = ManifestUpdater::new(Arc::clone(&self.store), self.coordinates.bucket())
                .with_max_conflict_retries(self.manifest_conflict_retries)
                .with_retry_policy(self.upload.retry.clone());
            Some(
                updater
                    .update(self.coordinates.dataset(), self.coordinates.version())
                    .await?,
            )
        } else {
            None
        };

        let report = PublishReport {
            destination: self.coordinates.to_string(),
            files_uploaded,
            failures,
            cancelled,
            manifest,
            started_at,
            elapsed: start.elapsed(),
        };
        info!(
            started_at = %started_at.to_rfc3339(),
            uploaded = report.files_uploaded,
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Publish finished"
        );
        Ok(report)
    }
}

/// Push walked paths into the queue until the walk ends or nobody listens.
///
/// Returns the number of files walked. On a traversal error feeding stops
/// and the sender is dropped, so workers finish the paths already queued
/// and then exit.
fn feed_paths(
    walker: TileWalker,
    paths: mpsc::Sender<std::path::PathBuf>,
    cancel: CancellationToken,
) -> Result<usize, WalkError> {
    let mut fed = 0usize;
    for item in walker {
        if cancel.is_cancelled() {
            break;
        }
        match item {
            Ok(path) => {
                if paths.blocking_send(path).is_err() {
                    break;
                }
                fed += 1;
            }
            Err(e) => {
                error!(
                    error = %e,
                    queued = fed,
                    "Tile cache traversal failed, finishing queued uploads"
                );
                return Err(e);
            }
        }
    }
    Ok(fed)
}
