//! Bounded upload worker pool.
//!
//! A fixed set of tokio tasks drains one shared queue of local paths. Each
//! path is handled by exactly one worker: metadata and key are computed,
//! the file is uploaded with retry, and an [`UploadOutcome`] is emitted
//! whether or not the upload succeeded.
//!
//! ```text
//! walker ──► mpsc (bounded) ──► worker 1 ─┐
//!                           ├─► worker 2 ─┼──► outcomes (unbounded)
//!                           └─► worker N ─┘
//! ```
//!
//! Workers check the cancellation token between queue pulls. A cancelled
//! pool stops pulling; uploads already in flight run to completion and
//! their outcomes are still reported.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::UploadConfig;
use crate::coordinates::PublishCoordinates;
use crate::key::KeyTranslator;
use crate::metadata::ObjectMetadata;
use crate::storage::ObjectStore;

use super::outcome::{UploadError, UploadOutcome};
use super::retry::{with_retry, RetryPolicy};

type SharedQueue = Arc<Mutex<mpsc::Receiver<PathBuf>>>;

/// Everything a worker needs to upload one file. Shared read-only.
struct WorkerContext {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    translator: KeyTranslator,
    retry: RetryPolicy,
}

impl WorkerContext {
    async fn upload_one(&self, path: PathBuf) -> UploadOutcome {
        let key = match self.translator.key_for(&path) {
            Ok(key) => key,
            Err(e) => {
                return UploadOutcome {
                    path,
                    key: None,
                    attempts: 0,
                    result: Err(UploadError::Key(e)),
                }
            }
        };

        let metadata = ObjectMetadata::for_path(&path);
        let outcome = with_retry(&self.retry, "upload", || {
            self.store.put_file(&self.bucket, &key, &path, &metadata)
        })
        .await;

        UploadOutcome {
            path,
            key: Some(key),
            attempts: outcome.attempts,
            result: outcome.result.map_err(UploadError::from),
        }
    }
}

/// Uploads files from a queue with a fixed number of concurrent workers.
pub struct UploadPool {
    context: Arc<WorkerContext>,
    workers: usize,
    queue_depth: usize,
}

impl UploadPool {
    /// Create a pool for one publish run.
    ///
    /// # Arguments
    ///
    /// * `store` - Transport shared by every worker
    /// * `coordinates` - Destination bucket and key prefix
    /// * `translator` - Maps local paths to keys; its style is replaced by
    ///   `config.key_style`
    /// * `config` - Worker count, retry policy and key style
    pub fn new(
        store: Arc<dyn ObjectStore>,
        coordinates: &PublishCoordinates,
        translator: KeyTranslator,
        config: UploadConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        let queue_depth = config.queue_depth();
        Self {
            context: Arc::new(WorkerContext {
                store,
                bucket: coordinates.bucket().to_string(),
                translator: translator.with_style(config.key_style),
                retry: config.retry,
            }),
            workers,
            queue_depth,
        }
    }

    /// Number of worker tasks.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Capacity of the path queue feeding the workers.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Start the workers on `paths`.
    ///
    /// Returns the outcome stream and the worker tasks. The stream closes
    /// once every worker has exited, which happens when `paths` is closed
    /// and drained or when `cancel` fires.
    pub fn spawn(
        &self,
        paths: mpsc::Receiver<PathBuf>,
        cancel: CancellationToken,
    ) -> (mpsc::UnboundedReceiver<UploadOutcome>, JoinSet<()>) {
        let queue: SharedQueue = Arc::new(Mutex::new(paths));
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let mut tasks = JoinSet::new();
        for worker_id in 0..self.workers {
            tasks.spawn(run_worker(
                worker_id,
                Arc::clone(&self.context),
                Arc::clone(&queue),
                results_tx.clone(),
                cancel.clone(),
            ));
        }
        debug!(workers = self.workers, "Upload workers started");

        (results_rx, tasks)
    }

    /// Upload a fixed list of files and collect every outcome.
    ///
    /// Outcomes arrive in completion order, not input order.
    pub async fn upload_all(
        &self,
        paths: Vec<PathBuf>,
        cancel: CancellationToken,
    ) -> Vec<UploadOutcome> {
        let (paths_tx, paths_rx) = mpsc::channel(self.queue_depth);
        let feeder = tokio::spawn(async move {
            for path in paths {
                // Workers are gone (cancelled); stop feeding.
                if paths_tx.send(path).await.is_err() {
                    break;
                }
            }
        });

        let (mut results, tasks) = self.spawn(paths_rx, cancel);
        let mut outcomes = Vec::new();
        while let Some(outcome) = results.recv().await {
            outcomes.push(outcome);
        }

        join_workers(tasks).await;
        if let Err(e) = feeder.await {
            error!(error = %e, "Path feeder task failed");
        }
        outcomes
    }
}

/// Wait for worker tasks, logging any that panicked.
///
/// Returns the number of workers that did not exit cleanly.
pub async fn join_workers(mut tasks: JoinSet<()>) -> usize {
    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Upload worker task failed");
            failed += 1;
        }
    }
    failed
}

async fn run_worker(
    worker_id: usize,
    context: Arc<WorkerContext>,
    queue: SharedQueue,
    results: mpsc::UnboundedSender<UploadOutcome>,
    cancel: CancellationToken,
) {
    let mut processed = 0usize;

    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                path = queue.recv() => path,
            }
        };
        let Some(path) = next else {
            break;
        };

        let outcome = context.upload_one(path).await;
        processed += 1;
        if results.send(outcome).is_err() {
            // Nobody is listening anymore.
            break;
        }
    }

    debug!(
        worker = worker_id,
        processed,
        cancelled = cancel.is_cancelled(),
        "Upload worker finished"
    );
}
