//! TilePutty - publish pre-rendered map tile caches to object storage.
//!
//! A tile cache is a directory tree of tiles (`{z}/{x}/{y}.mvt`, `.png`, ...)
//! plus sibling metadata files. Publishing uploads every file to
//! `s3://{bucket}/{dataset}/{version}/{implementation}/{relative path}` with
//! content-type and caching headers chosen by extension, and can record the
//! published version in a shared `latest` manifest.
//!
//! # Modules
//!
//! - [`metadata`] - extension to header mapping
//! - [`key`] - local path to remote key translation
//! - [`walker`] - lazy tile cache traversal
//! - [`storage`] - object store trait with S3 and in-memory backends
//! - [`upload`] - worker pool and retry policy
//! - [`manifest`] - concurrency-safe latest manifest updates
//! - [`publisher`] - the end-to-end pipeline
//! - [`config`] - layered settings (defaults, config file, environment)

pub mod config;
pub mod coordinates;
pub mod key;
pub mod manifest;
pub mod metadata;
pub mod publisher;
pub mod storage;
pub mod upload;
pub mod walker;

pub use config::{ConfigError, ConfigFile, StorageConfig, UploadConfig};
pub use coordinates::PublishCoordinates;
pub use key::{remote_key, KeyError, KeyStyle, KeyTranslator};
pub use manifest::{LatestManifest, ManifestEntry, ManifestError, ManifestUpdater};
pub use metadata::ObjectMetadata;
pub use publisher::{FailedUpload, PublishError, PublishReport, PublishResult, TilePublisher};
pub use storage::{ObjectStore, StorageError};
pub use upload::{RetryPolicy, UploadOutcome, UploadPool};
pub use walker::{TileWalker, WalkError};
